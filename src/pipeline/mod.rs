//! Staged cognitive pipelines.
//!
//! A pipeline is an ordered sequence of stages sharing a data slot: each
//! stage's output becomes the next stage's input. Execution records
//! per-stage timing; a stage error or a cancellation fails the whole
//! pipeline, with earlier stages' side effects preserved (no rollback).

use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use crate::atom::{unix_now, Atom};
use crate::error::{PipelineError, PipelineResult};
use crate::infer::CancelSignal;

pub mod orchestrator;
pub mod stages;

pub use orchestrator::{OrchestratorStats, PipelineOrchestrator};
pub use stages::{
    AgentExecutionStage, AtomIngestionStage, AttentionAllocationStage, InferenceStage,
};

/// Lifecycle state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Created,
    Running,
    Completed,
    Failed,
    Paused,
}

/// Value threaded from stage to stage.
#[derive(Debug, Clone)]
pub enum StageData {
    /// A collection of atoms.
    Atoms(Vec<Arc<Atom>>),
    /// Nothing; stages that ignore their input accept this.
    Empty,
}

impl StageData {
    /// Short label used in incompatible-data diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            StageData::Atoms(_) => "atoms",
            StageData::Empty => "empty",
        }
    }

    pub fn into_atoms(self) -> Option<Vec<Arc<Atom>>> {
        match self {
            StageData::Atoms(atoms) => Some(atoms),
            StageData::Empty => None,
        }
    }
}

/// One step of a pipeline.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, cancel: CancelSignal, input: StageData)
        -> PipelineResult<StageData>;
}

/// Wall-clock cost of one executed stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: String,
    pub duration_ms: u64,
}

#[derive(Debug)]
struct Progress {
    state: PipelineState,
    created_at: u64,
    started_at: Option<u64>,
    completed_at: Option<u64>,
    stage_timings: Vec<StageTiming>,
}

/// Snapshot of a pipeline's lifecycle and timing.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub state: PipelineState,
    pub stages: usize,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub stage_timings: Vec<StageTiming>,
}

/// An ordered sequence of stages with shared lifecycle state.
pub struct Pipeline {
    id: String,
    name: String,
    tenant_id: String,
    stages: RwLock<Vec<Arc<dyn PipelineStage>>>,
    progress: Mutex<Progress>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

impl Pipeline {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tenant_id: tenant_id.into(),
            stages: RwLock::new(Vec::new()),
            progress: Mutex::new(Progress {
                state: PipelineState::Created,
                created_at: unix_now(),
                started_at: None,
                completed_at: None,
                stage_timings: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn state(&self) -> PipelineState {
        self.progress.lock().expect("pipeline lock poisoned").state
    }

    pub fn add_stage(&self, stage: Arc<dyn PipelineStage>) {
        self.stages
            .write()
            .expect("pipeline stages lock poisoned")
            .push(stage);
    }

    pub fn stage_count(&self) -> usize {
        self.stages
            .read()
            .expect("pipeline stages lock poisoned")
            .len()
    }

    /// Walk the stages in order, threading each output into the next input.
    ///
    /// On a stage error the pipeline transitions to `Failed` and the error
    /// is wrapped in [`PipelineError::StageFailed`]; completed stages keep
    /// their side effects.
    pub async fn execute(
        &self,
        cancel: &CancelSignal,
        input: StageData,
    ) -> PipelineResult<StageData> {
        let stages = self
            .stages
            .read()
            .expect("pipeline stages lock poisoned")
            .clone();

        {
            let mut progress = self.progress.lock().expect("pipeline lock poisoned");
            progress.state = PipelineState::Running;
            progress.started_at = Some(unix_now());
            progress.stage_timings.clear();
        }

        let mut data = input;
        for (stage_index, stage) in stages.iter().enumerate() {
            if *cancel.borrow() {
                self.finish(PipelineState::Failed);
                return Err(PipelineError::Cancelled { stage_index });
            }

            let start = Instant::now();
            match stage.execute(cancel.clone(), data).await {
                Ok(output) => {
                    self.progress
                        .lock()
                        .expect("pipeline lock poisoned")
                        .stage_timings
                        .push(StageTiming {
                            stage: stage.name().to_string(),
                            duration_ms: start.elapsed().as_millis() as u64,
                        });
                    data = output;
                }
                Err(e) => {
                    tracing::warn!(
                        pipeline = %self.id,
                        stage = %stage.name(),
                        stage_index,
                        error = %e,
                        "pipeline stage failed",
                    );
                    self.finish(PipelineState::Failed);
                    return Err(PipelineError::StageFailed {
                        pipeline_name: self.name.clone(),
                        stage_name: stage.name().to_string(),
                        stage_index,
                        source: Box::new(e),
                    });
                }
            }
        }

        self.finish(PipelineState::Completed);
        Ok(data)
    }

    fn finish(&self, state: PipelineState) {
        let mut progress = self.progress.lock().expect("pipeline lock poisoned");
        progress.state = state;
        progress.completed_at = Some(unix_now());
    }

    pub fn stats(&self) -> PipelineStats {
        let progress = self.progress.lock().expect("pipeline lock poisoned");
        PipelineStats {
            id: self.id.clone(),
            name: self.name.clone(),
            tenant_id: self.tenant_id.clone(),
            state: progress.state,
            stages: self.stage_count(),
            created_at: progress.created_at,
            started_at: progress.started_at,
            completed_at: progress.completed_at,
            stage_timings: progress.stage_timings.clone(),
        }
    }
}
