//! Cognitive engine façade: the single public entry point.
//!
//! `CognitiveEngine` owns the shard manager, one inference engine per
//! tenant, the agent scheduler, and the pipeline orchestrator, and wires
//! them together: initializing a tenant builds its tenant-scoped store view,
//! loads the default rules, and registers its MindAgent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use crate::agents::{
    AgentScheduler, AgentSchedulerConfig, CognitiveAgent, MindAgent, SchedulerStats,
};
use crate::atom::{unix_now, Atom, AtomId, AtomType};
use crate::error::{EngineError, NoesisResult, SpaceResult};
use crate::infer::{default_rules, CancelSignal, InferenceEngine};
use crate::pipeline::{
    AgentExecutionStage, AttentionAllocationStage, InferenceStage, OrchestratorStats,
    Pipeline, PipelineOrchestrator, PipelineStage, StageData,
};
use crate::shard::{ShardManager, ShardManagerConfig, ShardStats, TenantStats};
use crate::space::{AtomFilter, AtomMutator, AtomStore, SpaceStats};

/// Iteration cap for the default pipeline's inference stage.
const DEFAULT_PIPELINE_ITERATIONS: usize = 5;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Worker-pool sizing for the whole runtime.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Number of atomspace shards (default: 8).
    pub num_shards: usize,
    /// Request workers per shard (default: 4).
    pub workers_per_shard: usize,
    /// Rule-dispatch workers per tenant engine (default: 16).
    pub inference_workers: usize,
    /// Agent-run workers (default: 8).
    pub agent_workers: usize,
    /// Pipeline-execution workers (default: 8).
    pub pipeline_workers: usize,
    /// Agent scheduling tick in milliseconds (default: 100).
    pub agent_tick_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_shards: 8,
            workers_per_shard: 4,
            inference_workers: 16,
            agent_workers: 8,
            pipeline_workers: 8,
            agent_tick_ms: 100,
        }
    }
}

/// Liveness summary.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub num_tenants: usize,
    pub num_shards: usize,
    pub timestamp: u64,
}

/// Full statistics snapshot: configuration, sharding, agents, pipelines,
/// and optionally one tenant's atom distribution.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub config: Config,
    pub sharding: ShardStats,
    pub agents: SchedulerStats,
    pub pipelines: OrchestratorStats,
    pub tenant: Option<TenantStats>,
}

// ---------------------------------------------------------------------------
// Tenant-scoped store view
// ---------------------------------------------------------------------------

/// Thin atomspace view forwarding every operation to the shard manager,
/// with the owning tenant baked in. Handed to the tenant's inference
/// engine, agents, and pipeline stages.
pub struct TenantSpace {
    shards: Arc<ShardManager>,
    tenant_id: String,
}

impl TenantSpace {
    pub fn new(shards: Arc<ShardManager>, tenant_id: impl Into<String>) -> Self {
        Self {
            shards,
            tenant_id: tenant_id.into(),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

#[async_trait]
impl AtomStore for TenantSpace {
    async fn add_atom(&self, atom: Arc<Atom>) -> SpaceResult<()> {
        self.shards.add_atom(atom).await
    }

    async fn get_atom(&self, id: &AtomId, tenant_id: &str) -> SpaceResult<Arc<Atom>> {
        self.shards.get_atom(id, tenant_id).await
    }

    async fn query_atoms(
        &self,
        tenant_id: &str,
        filter: Option<AtomFilter>,
    ) -> SpaceResult<Vec<Arc<Atom>>> {
        self.shards.query_atoms(tenant_id, filter).await
    }

    async fn update_atom(
        &self,
        id: &AtomId,
        tenant_id: &str,
        mutator: AtomMutator,
    ) -> SpaceResult<()> {
        self.shards.update_atom(id, tenant_id, mutator).await
    }

    async fn delete_atom(&self, id: &AtomId, tenant_id: &str) -> SpaceResult<()> {
        self.shards.delete_atom(id, tenant_id).await
    }

    async fn stats(&self, tenant_id: &str) -> SpaceResult<SpaceStats> {
        let tenant = self.shards.tenant_stats(tenant_id).await?;
        Ok(SpaceStats {
            total_atoms: tenant.total_atoms,
            atoms_by_type: tenant.atoms_by_type,
        })
    }
}

// ---------------------------------------------------------------------------
// Cognitive engine
// ---------------------------------------------------------------------------

/// The runtime façade bundling all subsystems.
pub struct CognitiveEngine {
    config: Config,
    shards: Arc<ShardManager>,
    engines: DashMap<String, Arc<InferenceEngine>>,
    scheduler: Arc<AgentScheduler>,
    orchestrator: Arc<PipelineOrchestrator>,
    closed: AtomicBool,
}

impl std::fmt::Debug for CognitiveEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CognitiveEngine")
            .field("num_shards", &self.config.num_shards)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl CognitiveEngine {
    /// Construct the runtime and start every worker pool.
    pub fn new(config: Config) -> NoesisResult<Self> {
        if config.num_shards == 0 {
            return Err(EngineError::InvalidConfig {
                message: "num_shards must be > 0".into(),
            }
            .into());
        }
        if config.workers_per_shard == 0
            || config.inference_workers == 0
            || config.agent_workers == 0
            || config.pipeline_workers == 0
        {
            return Err(EngineError::InvalidConfig {
                message: "worker pool sizes must be > 0".into(),
            }
            .into());
        }

        tracing::info!(
            num_shards = config.num_shards,
            workers_per_shard = config.workers_per_shard,
            inference_workers = config.inference_workers,
            agent_workers = config.agent_workers,
            pipeline_workers = config.pipeline_workers,
            "initializing cognitive engine",
        );

        let shards = Arc::new(ShardManager::new(ShardManagerConfig {
            num_shards: config.num_shards,
            workers_per_shard: config.workers_per_shard,
            ..Default::default()
        }));
        let scheduler = Arc::new(AgentScheduler::new(AgentSchedulerConfig {
            workers: config.agent_workers,
            tick: std::time::Duration::from_millis(config.agent_tick_ms),
            ..Default::default()
        }));
        let orchestrator = Arc::new(PipelineOrchestrator::new(config.pipeline_workers));

        Ok(Self {
            config,
            shards,
            engines: DashMap::new(),
            scheduler,
            orchestrator,
            closed: AtomicBool::new(false),
        })
    }

    // -----------------------------------------------------------------------
    // Tenants
    // -----------------------------------------------------------------------

    /// Set up a tenant: its store view, an inference engine pre-loaded with
    /// the default rules, and a registered MindAgent. One-shot per tenant.
    pub async fn initialize_tenant(&self, tenant_id: &str) -> NoesisResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed.into());
        }
        if tenant_id.is_empty() {
            return Err(crate::error::AtomError::EmptyTenant.into());
        }

        let engine = {
            match self.engines.entry(tenant_id.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(EngineError::TenantAlreadyExists {
                        tenant_id: tenant_id.to_string(),
                    }
                    .into());
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    let space: Arc<dyn AtomStore> =
                        Arc::new(TenantSpace::new(Arc::clone(&self.shards), tenant_id));
                    let engine = Arc::new(InferenceEngine::new(
                        space,
                        self.config.inference_workers,
                    ));
                    for rule in default_rules() {
                        engine.add_rule(rule);
                    }
                    slot.insert(Arc::clone(&engine));
                    engine
                }
            }
        };

        let mind_agent = MindAgent::new(
            format!("mind-{tenant_id}"),
            "MindAgent",
            tenant_id,
            engine,
        );
        self.scheduler
            .register(Arc::new(mind_agent) as Arc<dyn CognitiveAgent>)
            .await?;

        tracing::info!(tenant_id, "tenant initialized");
        Ok(())
    }

    fn tenant_engine(&self, tenant_id: &str) -> NoesisResult<Arc<InferenceEngine>> {
        self.engines
            .get(tenant_id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| {
                EngineError::TenantNotInitialized {
                    tenant_id: tenant_id.to_string(),
                }
                .into()
            })
    }

    // -----------------------------------------------------------------------
    // Atom operations
    // -----------------------------------------------------------------------

    pub async fn add_atom(&self, atom: Arc<Atom>) -> NoesisResult<()> {
        Ok(self.shards.add_atom(atom).await?)
    }

    pub async fn get_atom(&self, id: &AtomId, tenant_id: &str) -> NoesisResult<Arc<Atom>> {
        Ok(self.shards.get_atom(id, tenant_id).await?)
    }

    pub async fn query_atoms(
        &self,
        tenant_id: &str,
        filter: Option<AtomFilter>,
    ) -> NoesisResult<Vec<Arc<Atom>>> {
        Ok(self.shards.query_atoms(tenant_id, filter).await?)
    }

    pub async fn update_atom(
        &self,
        id: &AtomId,
        tenant_id: &str,
        mutator: AtomMutator,
    ) -> NoesisResult<()> {
        Ok(self.shards.update_atom(id, tenant_id, mutator).await?)
    }

    pub async fn delete_atom(&self, id: &AtomId, tenant_id: &str) -> NoesisResult<()> {
        Ok(self.shards.delete_atom(id, tenant_id).await?)
    }

    /// Build and insert a ConceptNode.
    pub async fn create_concept_node(
        &self,
        name: &str,
        tenant_id: &str,
    ) -> NoesisResult<Arc<Atom>> {
        let atom = Arc::new(Atom::node(AtomType::ConceptNode, name, tenant_id)?);
        self.shards.add_atom(Arc::clone(&atom)).await?;
        Ok(atom)
    }

    /// Build and insert an InheritanceLink between two existing atoms of the
    /// same tenant. Fails if either endpoint is missing or foreign.
    pub async fn create_inheritance_link(
        &self,
        source_id: &AtomId,
        target_id: &AtomId,
        tenant_id: &str,
    ) -> NoesisResult<Arc<Atom>> {
        let source = self.shards.get_atom(source_id, tenant_id).await?;
        let target = self.shards.get_atom(target_id, tenant_id).await?;

        let link = Arc::new(Atom::link(
            AtomType::InheritanceLink,
            "inheritance",
            tenant_id,
            vec![source, target],
        )?);
        self.shards.add_atom(Arc::clone(&link)).await?;
        Ok(link)
    }

    // -----------------------------------------------------------------------
    // Inference
    // -----------------------------------------------------------------------

    /// Run the tenant's engine to a fixpoint (or the iteration cap) and
    /// return the newly produced atoms.
    pub async fn run_inference(
        &self,
        tenant_id: &str,
        max_iterations: usize,
        cancel: &CancelSignal,
    ) -> NoesisResult<Vec<Arc<Atom>>> {
        let engine = self.tenant_engine(tenant_id)?;
        let outcome = engine
            .run_inference(tenant_id, max_iterations, cancel)
            .await?;
        Ok(outcome.new_atoms)
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    pub async fn register_agent(&self, agent: Arc<dyn CognitiveAgent>) -> NoesisResult<()> {
        Ok(self.scheduler.register(agent).await?)
    }

    pub async fn unregister_agent(&self, agent_id: &str) -> NoesisResult<()> {
        Ok(self.scheduler.unregister(agent_id).await?)
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<Arc<dyn CognitiveAgent>> {
        self.scheduler.get_agent(agent_id)
    }

    pub fn agents_by_tenant(&self, tenant_id: &str) -> Vec<Arc<dyn CognitiveAgent>> {
        self.scheduler.agents_by_tenant(tenant_id)
    }

    // -----------------------------------------------------------------------
    // Pipelines
    // -----------------------------------------------------------------------

    pub async fn create_pipeline(
        &self,
        pipeline_id: &str,
        name: &str,
        tenant_id: &str,
    ) -> NoesisResult<Arc<Pipeline>> {
        let pipeline = Arc::new(Pipeline::new(pipeline_id, name, tenant_id));
        self.orchestrator
            .create_pipeline(Arc::clone(&pipeline))
            .await?;
        Ok(pipeline)
    }

    pub async fn add_pipeline_stage(
        &self,
        pipeline_id: &str,
        stage: Arc<dyn PipelineStage>,
    ) -> NoesisResult<()> {
        let pipeline = self.orchestrator.get_pipeline(pipeline_id)?;
        pipeline.add_stage(stage);
        Ok(())
    }

    pub async fn execute_pipeline(
        &self,
        pipeline_id: &str,
        cancel: &CancelSignal,
        input: StageData,
    ) -> NoesisResult<StageData> {
        Ok(self
            .orchestrator
            .execute_pipeline(pipeline_id, cancel, input)
            .await?)
    }

    pub fn get_pipeline(&self, pipeline_id: &str) -> NoesisResult<Arc<Pipeline>> {
        Ok(self.orchestrator.get_pipeline(pipeline_id)?)
    }

    pub async fn delete_pipeline(&self, pipeline_id: &str) -> NoesisResult<()> {
        Ok(self.orchestrator.delete_pipeline(pipeline_id).await?)
    }

    /// Create the three-stage default pipeline for a tenant:
    /// Inference → AttentionAllocation → AgentExecution.
    pub async fn create_default_pipeline(&self, tenant_id: &str) -> NoesisResult<String> {
        let engine = self.tenant_engine(tenant_id)?;

        let pipeline_id = format!("default-pipeline-{tenant_id}-{}", unix_now());
        self.create_pipeline(&pipeline_id, "Default Cognitive Pipeline", tenant_id)
            .await?;

        let store: Arc<dyn AtomStore> =
            Arc::new(TenantSpace::new(Arc::clone(&self.shards), tenant_id));
        self.add_pipeline_stage(
            &pipeline_id,
            Arc::new(InferenceStage::new(
                engine,
                tenant_id,
                DEFAULT_PIPELINE_ITERATIONS,
            )),
        )
        .await?;
        self.add_pipeline_stage(
            &pipeline_id,
            Arc::new(AttentionAllocationStage::new(store, tenant_id)),
        )
        .await?;
        self.add_pipeline_stage(
            &pipeline_id,
            Arc::new(AgentExecutionStage::new(
                Arc::clone(&self.scheduler),
                tenant_id,
            )),
        )
        .await?;

        Ok(pipeline_id)
    }

    // -----------------------------------------------------------------------
    // Introspection & lifecycle
    // -----------------------------------------------------------------------

    /// Statistics snapshot; pass a tenant to include its atom distribution.
    pub async fn stats(&self, tenant_id: Option<&str>) -> NoesisResult<EngineStats> {
        let tenant = match tenant_id {
            Some(t) => Some(self.shards.tenant_stats(t).await?),
            None => None,
        };
        Ok(EngineStats {
            config: self.config.clone(),
            sharding: self.shards.shard_stats(),
            agents: self.scheduler.stats(),
            pipelines: self.orchestrator.stats(),
            tenant,
        })
    }

    pub fn health(&self) -> Health {
        Health {
            status: "healthy",
            num_tenants: self.engines.len(),
            num_shards: self.config.num_shards,
            timestamp: unix_now(),
        }
    }

    /// Shut down every worker pool. A second close is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("shutting down cognitive engine");
        self.shards.close();
        for entry in self.engines.iter() {
            entry.value().close();
        }
        self.scheduler.close();
        self.orchestrator.close();
    }

    /// Per-tenant per-type atom counts, aggregated across shards.
    pub async fn tenant_stats(&self, tenant_id: &str) -> NoesisResult<TenantStats> {
        Ok(self.shards.tenant_stats(tenant_id).await?)
    }

    /// Per-rule inference counters for a tenant's engine.
    pub fn inference_stats(
        &self,
        tenant_id: &str,
    ) -> NoesisResult<crate::infer::InferenceStats> {
        Ok(self.tenant_engine(tenant_id)?.stats())
    }
}

impl Drop for CognitiveEngine {
    fn drop(&mut self) {
        self.close();
    }
}
