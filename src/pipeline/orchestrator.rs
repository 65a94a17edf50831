//! Pipeline registry and execution pool.
//!
//! Creation and deletion flow through a single management task; execution
//! requests are served by a worker pool so concurrent pipelines run in
//! parallel. Pipeline ids are unique within the orchestrator.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};

use crate::error::{PipelineError, PipelineResult};
use crate::infer::CancelSignal;

use super::{Pipeline, PipelineStats, StageData};

const MANAGE_QUEUE_DEPTH: usize = 100;
const EXECUTE_QUEUE_DEPTH: usize = 1000;

struct CreateRequest {
    pipeline: Arc<Pipeline>,
    reply: oneshot::Sender<PipelineResult<()>>,
}

struct ExecuteRequest {
    pipeline_id: String,
    cancel: CancelSignal,
    input: StageData,
    reply: oneshot::Sender<PipelineResult<StageData>>,
}

/// Orchestrator-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub total_pipelines: usize,
    pub workers: usize,
    pub pipelines: Vec<PipelineStats>,
}

/// Registry of pipelines plus the pool executing them.
pub struct PipelineOrchestrator {
    pipelines: Arc<DashMap<String, Arc<Pipeline>>>,
    create_tx: mpsc::Sender<CreateRequest>,
    delete_tx: mpsc::Sender<String>,
    execute_tx: mpsc::Sender<ExecuteRequest>,
    shutdown_tx: watch::Sender<bool>,
    workers: usize,
}

impl PipelineOrchestrator {
    /// Start the management task and `workers` execution tasks.
    pub fn new(workers: usize) -> Self {
        let pipelines: Arc<DashMap<String, Arc<Pipeline>>> = Arc::new(DashMap::new());
        let (create_tx, mut create_rx) = mpsc::channel::<CreateRequest>(MANAGE_QUEUE_DEPTH);
        let (delete_tx, mut delete_rx) = mpsc::channel::<String>(MANAGE_QUEUE_DEPTH);
        let (execute_tx, execute_rx) = mpsc::channel::<ExecuteRequest>(EXECUTE_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workers = workers.max(1);
        let execute_rx = Arc::new(Mutex::new(execute_rx));
        for _ in 0..workers {
            let execute_rx = Arc::clone(&execute_rx);
            let pipelines = Arc::clone(&pipelines);
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        req = async { execute_rx.lock().await.recv().await } => {
                            let Some(req) = req else { break };
                            // Clone the Arc out before awaiting so no map
                            // guard is held across the execution.
                            let found = pipelines
                                .get(&req.pipeline_id)
                                .map(|p| Arc::clone(&p));
                            let result = match found {
                                None => Err(PipelineError::NotFound {
                                    id: req.pipeline_id.clone(),
                                }),
                                Some(pipeline) => {
                                    pipeline.execute(&req.cancel, req.input).await
                                }
                            };
                            let _ = req.reply.send(result);
                        }
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        let manage_pipelines = Arc::clone(&pipelines);
        let mut manage_shutdown = shutdown_rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    req = create_rx.recv() => {
                        let Some(req) = req else { break };
                        let result = match manage_pipelines.entry(req.pipeline.id().to_string()) {
                            dashmap::mapref::entry::Entry::Occupied(_) => {
                                Err(PipelineError::AlreadyExists {
                                    id: req.pipeline.id().to_string(),
                                })
                            }
                            dashmap::mapref::entry::Entry::Vacant(slot) => {
                                slot.insert(req.pipeline);
                                Ok(())
                            }
                        };
                        let _ = req.reply.send(result);
                    }
                    pipeline_id = delete_rx.recv() => {
                        let Some(pipeline_id) = pipeline_id else { break };
                        manage_pipelines.remove(&pipeline_id);
                    }
                    _ = manage_shutdown.changed() => {
                        if *manage_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            pipelines,
            create_tx,
            delete_tx,
            execute_tx,
            shutdown_tx,
            workers,
        }
    }

    /// Register a pipeline; duplicate ids are rejected.
    pub async fn create_pipeline(&self, pipeline: Arc<Pipeline>) -> PipelineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.create_tx
            .send(CreateRequest { pipeline, reply })
            .await
            .map_err(|_| PipelineError::Closed)?;
        rx.await.map_err(|_| PipelineError::Closed)?
    }

    /// Execute a registered pipeline on a pool worker.
    pub async fn execute_pipeline(
        &self,
        pipeline_id: &str,
        cancel: &CancelSignal,
        input: StageData,
    ) -> PipelineResult<StageData> {
        let (reply, rx) = oneshot::channel();
        self.execute_tx
            .send(ExecuteRequest {
                pipeline_id: pipeline_id.to_string(),
                cancel: cancel.clone(),
                input,
                reply,
            })
            .await
            .map_err(|_| PipelineError::Closed)?;
        rx.await.map_err(|_| PipelineError::Closed)?
    }

    pub fn get_pipeline(&self, pipeline_id: &str) -> PipelineResult<Arc<Pipeline>> {
        self.pipelines
            .get(pipeline_id)
            .map(|p| Arc::clone(&p))
            .ok_or_else(|| PipelineError::NotFound {
                id: pipeline_id.to_string(),
            })
    }

    pub fn pipelines_by_tenant(&self, tenant_id: &str) -> Vec<Arc<Pipeline>> {
        self.pipelines
            .iter()
            .filter(|p| p.tenant_id() == tenant_id)
            .map(|p| Arc::clone(&p))
            .collect()
    }

    /// Remove a pipeline. Unknown ids are ignored.
    pub async fn delete_pipeline(&self, pipeline_id: &str) -> PipelineResult<()> {
        self.delete_tx
            .send(pipeline_id.to_string())
            .await
            .map_err(|_| PipelineError::Closed)
    }

    pub fn stats(&self) -> OrchestratorStats {
        let pipelines: Vec<PipelineStats> =
            self.pipelines.iter().map(|p| p.stats()).collect();
        OrchestratorStats {
            total_pipelines: pipelines.len(),
            workers: self.workers,
            pipelines,
        }
    }

    /// Stop the management task and execution pool.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
