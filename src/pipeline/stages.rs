//! Built-in pipeline stages.
//!
//! Ingestion, inference, attention allocation, and agent execution — the
//! building blocks the default cognitive pipeline is assembled from.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::AgentScheduler;
use crate::error::{PipelineError, PipelineResult, SpaceError};
use crate::infer::{CancelSignal, InferenceEngine};
use crate::space::AtomStore;

use super::{PipelineStage, StageData};

// ---------------------------------------------------------------------------
// Atom ingestion
// ---------------------------------------------------------------------------

/// Bulk-adds the input atoms. Atoms that already exist are skipped silently;
/// any other store error aborts the stage.
pub struct AtomIngestionStage {
    store: Arc<dyn AtomStore>,
}

impl AtomIngestionStage {
    pub fn new(store: Arc<dyn AtomStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PipelineStage for AtomIngestionStage {
    fn name(&self) -> &str {
        "atom-ingestion"
    }

    async fn execute(
        &self,
        _cancel: CancelSignal,
        input: StageData,
    ) -> PipelineResult<StageData> {
        let StageData::Atoms(atoms) = input else {
            return Err(PipelineError::IncompatibleData {
                stage_name: self.name().to_string(),
                expected: "atoms".to_string(),
                actual: input.kind().to_string(),
            });
        };

        for atom in &atoms {
            match self.store.add_atom(Arc::clone(atom)).await {
                Ok(()) | Err(SpaceError::AlreadyExists { .. }) => {}
                Err(e) => {
                    return Err(PipelineError::StageExecution {
                        stage_name: self.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(StageData::Atoms(atoms))
    }
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// Runs a bounded inference cycle; outputs the newly produced atoms.
pub struct InferenceStage {
    engine: Arc<InferenceEngine>,
    tenant_id: String,
    max_iterations: usize,
}

impl InferenceStage {
    pub fn new(
        engine: Arc<InferenceEngine>,
        tenant_id: impl Into<String>,
        max_iterations: usize,
    ) -> Self {
        Self {
            engine,
            tenant_id: tenant_id.into(),
            max_iterations,
        }
    }
}

#[async_trait]
impl PipelineStage for InferenceStage {
    fn name(&self) -> &str {
        "inference"
    }

    async fn execute(
        &self,
        cancel: CancelSignal,
        _input: StageData,
    ) -> PipelineResult<StageData> {
        let outcome = self
            .engine
            .run_inference(&self.tenant_id, self.max_iterations, &cancel)
            .await
            .map_err(|e| PipelineError::StageExecution {
                stage_name: self.name().to_string(),
                message: e.to_string(),
            })?;
        Ok(StageData::Atoms(outcome.new_atoms))
    }
}

// ---------------------------------------------------------------------------
// Attention allocation
// ---------------------------------------------------------------------------

/// Boosts confidently believed atoms, then decays short-term importance.
pub struct AttentionAllocationStage {
    store: Arc<dyn AtomStore>,
    tenant_id: String,
}

impl AttentionAllocationStage {
    pub fn new(store: Arc<dyn AtomStore>, tenant_id: impl Into<String>) -> Self {
        Self {
            store,
            tenant_id: tenant_id.into(),
        }
    }
}

#[async_trait]
impl PipelineStage for AttentionAllocationStage {
    fn name(&self) -> &str {
        "attention-allocation"
    }

    async fn execute(
        &self,
        _cancel: CancelSignal,
        _input: StageData,
    ) -> PipelineResult<StageData> {
        let atoms = self
            .store
            .query_atoms(&self.tenant_id, None)
            .await
            .map_err(|e| PipelineError::StageExecution {
                stage_name: self.name().to_string(),
                message: e.to_string(),
            })?;

        for atom in &atoms {
            let mut av = atom.attention();
            if atom.truth().confidence > 0.8 {
                av.sti = av.sti.saturating_add(5);
            }
            av.sti = (f64::from(av.sti) * 0.95).floor() as i16;
            atom.set_attention(av);
        }

        Ok(StageData::Atoms(atoms))
    }
}

// ---------------------------------------------------------------------------
// Agent execution
// ---------------------------------------------------------------------------

/// Runs every agent of the tenant sequentially; an individual agent failure
/// is logged and skipped. The input passes through unchanged.
pub struct AgentExecutionStage {
    scheduler: Arc<AgentScheduler>,
    tenant_id: String,
}

impl AgentExecutionStage {
    pub fn new(scheduler: Arc<AgentScheduler>, tenant_id: impl Into<String>) -> Self {
        Self {
            scheduler,
            tenant_id: tenant_id.into(),
        }
    }
}

#[async_trait]
impl PipelineStage for AgentExecutionStage {
    fn name(&self) -> &str {
        "agent-execution"
    }

    async fn execute(
        &self,
        cancel: CancelSignal,
        input: StageData,
    ) -> PipelineResult<StageData> {
        for agent in self.scheduler.agents_by_tenant(&self.tenant_id) {
            if let Err(e) = agent.run(cancel.clone()).await {
                tracing::warn!(
                    agent_id = %agent.id(),
                    error = %e,
                    "agent failed during pipeline stage, continuing",
                );
            }
        }
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentSchedulerConfig;
    use crate::atom::{Atom, AtomType, AttentionValue, TruthValue};
    use crate::infer::{default_rules, no_cancel};
    use crate::pipeline::Pipeline;
    use crate::space::AtomSpace;

    fn concept(name: &str) -> Arc<Atom> {
        Arc::new(Atom::node(AtomType::ConceptNode, name, "demo").unwrap())
    }

    #[tokio::test]
    async fn ingestion_skips_duplicates() {
        let space = Arc::new(AtomSpace::new(2));
        let stage = AtomIngestionStage::new(Arc::clone(&space) as Arc<dyn AtomStore>);

        let atoms = vec![concept("Cat"), concept("Cat"), concept("Dog")];
        let out = stage
            .execute(no_cancel(), StageData::Atoms(atoms))
            .await
            .unwrap();

        assert_eq!(out.into_atoms().unwrap().len(), 3);
        assert_eq!(space.query_atoms("demo", None).await.unwrap().len(), 2);
        space.close();
    }

    #[tokio::test]
    async fn ingestion_rejects_empty_input() {
        let space = Arc::new(AtomSpace::new(2));
        let stage = AtomIngestionStage::new(Arc::clone(&space) as Arc<dyn AtomStore>);

        let err = stage.execute(no_cancel(), StageData::Empty).await.unwrap_err();
        assert!(matches!(err, PipelineError::IncompatibleData { .. }));
        space.close();
    }

    #[tokio::test]
    async fn inference_stage_outputs_new_atoms() {
        let space = Arc::new(AtomSpace::new(2));
        let engine = Arc::new(InferenceEngine::new(
            Arc::clone(&space) as Arc<dyn AtomStore>,
            2,
        ));
        for rule in default_rules() {
            engine.add_rule(rule);
        }

        let cat = concept("Cat");
        let mammal = concept("Mammal");
        let animal = concept("Animal");
        for atom in [&cat, &mammal, &animal] {
            space.add_atom(Arc::clone(atom)).await.unwrap();
        }
        for (s, t) in [(&cat, &mammal), (&mammal, &animal)] {
            let link = Arc::new(
                Atom::link(
                    AtomType::InheritanceLink,
                    "inheritance",
                    "demo",
                    vec![Arc::clone(s), Arc::clone(t)],
                )
                .unwrap(),
            );
            space.add_atom(link).await.unwrap();
        }

        let stage = InferenceStage::new(Arc::clone(&engine), "demo", 5);
        let out = stage.execute(no_cancel(), StageData::Empty).await.unwrap();
        assert_eq!(out.into_atoms().unwrap().len(), 1);

        engine.close();
        space.close();
    }

    #[tokio::test]
    async fn attention_stage_boosts_then_decays() {
        let space = Arc::new(AtomSpace::new(2));
        let confident = concept("Confident");
        let doubtful = concept("Doubtful");
        doubtful.set_truth(TruthValue::new(0.9, 0.5).unwrap());
        for atom in [&confident, &doubtful] {
            atom.set_attention(AttentionValue {
                sti: 100,
                lti: 0,
                vlti: 0,
            });
            space.add_atom(Arc::clone(atom)).await.unwrap();
        }

        let stage =
            AttentionAllocationStage::new(Arc::clone(&space) as Arc<dyn AtomStore>, "demo");
        stage.execute(no_cancel(), StageData::Empty).await.unwrap();

        // Confident: (100 + 5) * 0.95 = 99. Doubtful: 100 * 0.95 = 95.
        assert_eq!(confident.attention().sti, 99);
        assert_eq!(doubtful.attention().sti, 95);
        space.close();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn agent_stage_survives_agent_failure() {
        // A scheduler with no registered agents: the stage is a no-op that
        // still passes its input through.
        let scheduler = Arc::new(AgentScheduler::new(AgentSchedulerConfig {
            tick: std::time::Duration::from_secs(3600),
            ..Default::default()
        }));
        let stage = AgentExecutionStage::new(Arc::clone(&scheduler), "demo");

        let atoms = vec![concept("Cat")];
        let out = stage
            .execute(no_cancel(), StageData::Atoms(atoms))
            .await
            .unwrap();
        assert_eq!(out.into_atoms().unwrap().len(), 1);
        scheduler.close();
    }

    #[tokio::test]
    async fn failed_inference_stage_preserves_earlier_side_effects() {
        // Pipeline: ingestion, then a stage that errors, then attention.
        struct ErrorStage;
        #[async_trait]
        impl PipelineStage for ErrorStage {
            fn name(&self) -> &str {
                "error-stage"
            }
            async fn execute(
                &self,
                _cancel: CancelSignal,
                _input: StageData,
            ) -> PipelineResult<StageData> {
                Err(PipelineError::StageExecution {
                    stage_name: "error-stage".into(),
                    message: "synthetic".into(),
                })
            }
        }

        let space = Arc::new(AtomSpace::new(2));
        let pipeline = Pipeline::new("p1", "failing", "demo");
        pipeline.add_stage(Arc::new(AtomIngestionStage::new(
            Arc::clone(&space) as Arc<dyn AtomStore>
        )));
        pipeline.add_stage(Arc::new(ErrorStage));
        pipeline.add_stage(Arc::new(AttentionAllocationStage::new(
            Arc::clone(&space) as Arc<dyn AtomStore>,
            "demo",
        )));

        let err = pipeline
            .execute(&no_cancel(), StageData::Atoms(vec![concept("Cat")]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageFailed { stage_index: 1, .. }));

        // The ingestion stage's atoms survived the failure.
        assert_eq!(space.query_atoms("demo", None).await.unwrap().len(), 1);
        space.close();
    }
}
