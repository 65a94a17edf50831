//! Built-in cognitive agents.
//!
//! `MindAgent` drives a bounded inference cycle on every run; the façade
//! registers one per tenant. `AttentionAgent` implements the attention
//! economy: short-term importance decays every cycle and strongly believed
//! atoms get boosted.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AgentResult;
use crate::infer::{CancelSignal, InferenceEngine};
use crate::space::AtomStore;

use super::{AgentState, AgentStats, AgentVitals, CognitiveAgent};

/// Iteration cap for each MindAgent inference cycle.
const MIND_AGENT_ITERATIONS: usize = 5;

/// Multiplicative decay applied to STI on every attention cycle.
const STI_DECAY: f64 = 0.95;

// ---------------------------------------------------------------------------
// MindAgent
// ---------------------------------------------------------------------------

/// Runs a bounded inference cycle for its tenant on every dispatch.
pub struct MindAgent {
    id: String,
    name: String,
    tenant_id: String,
    priority: i32,
    vitals: AgentVitals,
    engine: Arc<InferenceEngine>,
}

impl MindAgent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        tenant_id: impl Into<String>,
        engine: Arc<InferenceEngine>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tenant_id: tenant_id.into(),
            priority: 10,
            vitals: AgentVitals::new(),
            engine,
        }
    }
}

#[async_trait]
impl CognitiveAgent for MindAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn state(&self) -> AgentState {
        self.vitals.state()
    }

    fn stats(&self) -> AgentStats {
        self.vitals
            .stats_for(&self.id, &self.name, &self.tenant_id, self.priority)
    }

    async fn run(&self, cancel: CancelSignal) -> AgentResult<()> {
        let guard = self.vitals.begin_run();
        match self
            .engine
            .run_inference(&self.tenant_id, MIND_AGENT_ITERATIONS, &cancel)
            .await
        {
            Ok(outcome) => {
                if !outcome.new_atoms.is_empty() {
                    tracing::debug!(
                        agent = %self.id,
                        new_atoms = outcome.new_atoms.len(),
                        iterations = outcome.iterations,
                        "mind agent inference cycle complete",
                    );
                }
                guard.succeed();
                Ok(())
            }
            Err(e) => {
                guard.fail();
                Err(e.into())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AttentionAgent
// ---------------------------------------------------------------------------

/// Reallocates attention across its tenant's atoms: decays short-term
/// importance and boosts atoms with strong, confident truth.
pub struct AttentionAgent {
    id: String,
    name: String,
    tenant_id: String,
    priority: i32,
    vitals: AgentVitals,
    store: Arc<dyn AtomStore>,
}

impl AttentionAgent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        tenant_id: impl Into<String>,
        store: Arc<dyn AtomStore>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tenant_id: tenant_id.into(),
            priority: 8,
            vitals: AgentVitals::new(),
            store,
        }
    }
}

#[async_trait]
impl CognitiveAgent for AttentionAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn state(&self) -> AgentState {
        self.vitals.state()
    }

    fn stats(&self) -> AgentStats {
        self.vitals
            .stats_for(&self.id, &self.name, &self.tenant_id, self.priority)
    }

    async fn run(&self, _cancel: CancelSignal) -> AgentResult<()> {
        let guard = self.vitals.begin_run();
        let atoms = match self.store.query_atoms(&self.tenant_id, None).await {
            Ok(atoms) => atoms,
            Err(e) => {
                guard.fail();
                return Err(e.into());
            }
        };

        for atom in &atoms {
            let mut av = atom.attention();
            av.sti = (f64::from(av.sti) * STI_DECAY).floor() as i16;

            let tv = atom.truth();
            if tv.strength > 0.8 && tv.confidence > 0.8 {
                av.sti = av.sti.saturating_add(10);
                av.lti = av.lti.saturating_add(1);
            }

            atom.set_attention(av);
        }

        guard.succeed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Atom, AtomType, AttentionValue, TruthValue};
    use crate::infer::{default_rules, no_cancel};
    use crate::space::AtomSpace;

    async fn space_with(names: &[&str]) -> Arc<AtomSpace> {
        let space = Arc::new(AtomSpace::new(2));
        for name in names {
            let atom = Arc::new(Atom::node(AtomType::ConceptNode, *name, "demo").unwrap());
            space.add_atom(atom).await.unwrap();
        }
        space
    }

    #[tokio::test]
    async fn mind_agent_reaches_closure() {
        let space = space_with(&["Cat", "Mammal", "Animal"]).await;
        let cat = space.atoms_by_name("demo", "Cat").pop().unwrap();
        let mammal = space.atoms_by_name("demo", "Mammal").pop().unwrap();
        let animal = space.atoms_by_name("demo", "Animal").pop().unwrap();
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

        let engine = Arc::new(InferenceEngine::new(
            Arc::clone(&space) as Arc<dyn AtomStore>,
            2,
        ));
        for rule in default_rules() {
            engine.add_rule(rule);
        }

        let agent = MindAgent::new("mind-demo", "MindAgent", "demo", Arc::clone(&engine));
        agent.run(no_cancel()).await.unwrap();

        assert_eq!(agent.state(), AgentState::Idle);
        assert_eq!(agent.stats().run_count, 1);
        // Cat→Animal was derived into the store.
        assert_eq!(space.query_atoms("demo", None).await.unwrap().len(), 6);

        engine.close();
        space.close();
    }

    #[tokio::test]
    async fn attention_agent_decays_and_boosts() {
        let space = space_with(&["Strong", "Weak"]).await;
        let strong = space.atoms_by_name("demo", "Strong").pop().unwrap();
        let weak = space.atoms_by_name("demo", "Weak").pop().unwrap();
        strong.set_attention(AttentionValue {
            sti: 100,
            lti: 0,
            vlti: 0,
        });
        weak.set_truth(TruthValue::new(0.5, 0.5).unwrap());
        weak.set_attention(AttentionValue {
            sti: 100,
            lti: 0,
            vlti: 0,
        });

        let agent = AttentionAgent::new(
            "attn-demo",
            "AttentionAgent",
            "demo",
            Arc::clone(&space) as Arc<dyn AtomStore>,
        );
        agent.run(no_cancel()).await.unwrap();

        // Strong (default truth 1.0/1.0): decayed to 95, boosted to 105,
        // lti bumped. Weak: decayed only.
        let strong_av = strong.attention();
        assert_eq!(strong_av.sti, 105);
        assert_eq!(strong_av.lti, 1);
        let weak_av = weak.attention();
        assert_eq!(weak_av.sti, 95);
        assert_eq!(weak_av.lti, 0);

        assert_eq!(agent.state(), AgentState::Idle);
        space.close();
    }

    #[tokio::test]
    async fn attention_boost_saturates() {
        let space = space_with(&["Hot"]).await;
        let hot = space.atoms_by_name("demo", "Hot").pop().unwrap();
        hot.set_attention(AttentionValue {
            sti: i16::MAX,
            lti: i16::MAX,
            vlti: 0,
        });

        let agent = AttentionAgent::new(
            "attn-demo",
            "AttentionAgent",
            "demo",
            Arc::clone(&space) as Arc<dyn AtomStore>,
        );
        agent.run(no_cancel()).await.unwrap();

        let av = hot.attention();
        assert!(av.sti > 0);
        assert_eq!(av.lti, i16::MAX);
        space.close();
    }

    #[tokio::test]
    async fn failed_run_leaves_error_state() {
        // A store that is already closed makes the attention agent fail.
        let space = Arc::new(AtomSpace::new(1));
        space.close();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let agent = AttentionAgent::new(
            "attn-demo",
            "AttentionAgent",
            "demo",
            Arc::clone(&space) as Arc<dyn AtomStore>,
        );
        assert!(agent.run(no_cancel()).await.is_err());
        assert_eq!(agent.state(), AgentState::Error);
    }
}
