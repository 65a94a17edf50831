//! Priority-ordered periodic agent execution.
//!
//! A single management task owns the registry: registration and
//! unregistration arrive on dedicated channels, and a tick (default 100 ms)
//! dispatches the priority-sorted agent list to a worker pool. The tick
//! driver awaits each agent before dispatching the next, so ordering within
//! a tick is deterministic; concurrency comes from overlapping ticks and
//! the pool. Every run is bounded by a hard deadline (default 5 s).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::timeout;

use crate::error::{AgentError, AgentResult};

use super::{AgentStats, CognitiveAgent};

const MANAGE_QUEUE_DEPTH: usize = 100;
const RUN_QUEUE_DEPTH: usize = 1000;

/// Configuration for the agent scheduler.
#[derive(Debug, Clone)]
pub struct AgentSchedulerConfig {
    /// Agent-run workers (default: 8).
    pub workers: usize,
    /// Scheduling tick (default: 100 ms).
    pub tick: Duration,
    /// Hard per-run deadline (default: 5 s).
    pub run_deadline: Duration,
}

impl Default for AgentSchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            tick: Duration::from_millis(100),
            run_deadline: Duration::from_secs(5),
        }
    }
}

/// Scheduler-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub total_agents: usize,
    pub workers: usize,
    pub agents: Vec<AgentStats>,
}

struct AgentEntry {
    agent: Arc<dyn CognitiveAgent>,
    /// Registration sequence; breaks priority ties.
    seq: u64,
}

#[derive(Default)]
struct Registry {
    by_id: DashMap<String, AgentEntry>,
    /// Priority-sorted dispatch order, rebuilt on every registry change.
    schedule: RwLock<Vec<Arc<dyn CognitiveAgent>>>,
    next_seq: AtomicU64,
}

impl Registry {
    fn register(&self, agent: Arc<dyn CognitiveAgent>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.by_id
            .insert(agent.id().to_string(), AgentEntry { agent, seq });
        self.rebuild_schedule();
    }

    fn unregister(&self, agent_id: &str) {
        self.by_id.remove(agent_id);
        self.rebuild_schedule();
    }

    fn rebuild_schedule(&self) {
        let mut entries: Vec<(i32, u64, Arc<dyn CognitiveAgent>)> = self
            .by_id
            .iter()
            .map(|e| (e.agent.priority(), e.seq, Arc::clone(&e.agent)))
            .collect();
        // Higher priority first; ties in registration order.
        entries.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        *self.schedule.write().expect("schedule lock poisoned") =
            entries.into_iter().map(|(_, _, a)| a).collect();
    }

    fn schedule_snapshot(&self) -> Vec<Arc<dyn CognitiveAgent>> {
        self.schedule
            .read()
            .expect("schedule lock poisoned")
            .clone()
    }
}

struct RunRequest {
    agent: Arc<dyn CognitiveAgent>,
    reply: oneshot::Sender<AgentResult<()>>,
}

/// Schedules and executes registered agents.
pub struct AgentScheduler {
    registry: Arc<Registry>,
    register_tx: mpsc::Sender<Arc<dyn CognitiveAgent>>,
    unregister_tx: mpsc::Sender<String>,
    shutdown_tx: watch::Sender<bool>,
    workers: usize,
}

impl AgentScheduler {
    /// Start the worker pool and the management/tick task.
    pub fn new(config: AgentSchedulerConfig) -> Self {
        let registry = Arc::new(Registry::default());
        let (register_tx, mut register_rx) =
            mpsc::channel::<Arc<dyn CognitiveAgent>>(MANAGE_QUEUE_DEPTH);
        let (unregister_tx, mut unregister_rx) = mpsc::channel::<String>(MANAGE_QUEUE_DEPTH);
        let (run_tx, run_rx) = mpsc::channel::<RunRequest>(RUN_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workers = config.workers.max(1);
        let run_rx = Arc::new(Mutex::new(run_rx));
        for _ in 0..workers {
            let run_rx = Arc::clone(&run_rx);
            let mut shutdown_rx = shutdown_rx.clone();
            let cancel_rx = shutdown_rx.clone();
            let deadline = config.run_deadline;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        req = async { run_rx.lock().await.recv().await } => {
                            let Some(req) = req else { break };
                            let agent_id = req.agent.id().to_string();
                            let result = match timeout(
                                deadline,
                                req.agent.run(cancel_rx.clone()),
                            )
                            .await
                            {
                                Ok(result) => result,
                                Err(_) => Err(AgentError::DeadlineExceeded {
                                    agent_id,
                                    deadline_ms: deadline.as_millis() as u64,
                                }),
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

        // Single management task: registry mutations and the dispatch tick.
        let manage_registry = Arc::clone(&registry);
        let mut manage_shutdown = shutdown_rx;
        let tick = config.tick;
        tokio::spawn(async move {
            // First tick fires one full period after startup.
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    agent = register_rx.recv() => {
                        let Some(agent) = agent else { break };
                        tracing::debug!(agent_id = %agent.id(), "agent registered");
                        manage_registry.register(agent);
                    }
                    agent_id = unregister_rx.recv() => {
                        let Some(agent_id) = agent_id else { break };
                        tracing::debug!(%agent_id, "agent unregistered");
                        manage_registry.unregister(&agent_id);
                    }
                    _ = interval.tick() => {
                        dispatch_tick(&manage_registry, &run_tx).await;
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
            registry,
            register_tx,
            unregister_tx,
            shutdown_tx,
            workers,
        }
    }

    /// Register an agent; it joins the dispatch order at the next tick.
    pub async fn register(&self, agent: Arc<dyn CognitiveAgent>) -> AgentResult<()> {
        self.register_tx
            .send(agent)
            .await
            .map_err(|_| AgentError::Closed)
    }

    /// Remove an agent from the registry.
    pub async fn unregister(&self, agent_id: &str) -> AgentResult<()> {
        self.unregister_tx
            .send(agent_id.to_string())
            .await
            .map_err(|_| AgentError::Closed)
    }

    /// Alias for [`register`](Self::register).
    pub async fn spawn_agent(&self, agent: Arc<dyn CognitiveAgent>) -> AgentResult<()> {
        self.register(agent).await
    }

    /// Alias for [`unregister`](Self::unregister).
    pub async fn terminate_agent(&self, agent_id: &str) -> AgentResult<()> {
        self.unregister(agent_id).await
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<Arc<dyn CognitiveAgent>> {
        self.registry
            .by_id
            .get(agent_id)
            .map(|e| Arc::clone(&e.agent))
    }

    pub fn agents_by_tenant(&self, tenant_id: &str) -> Vec<Arc<dyn CognitiveAgent>> {
        self.registry
            .by_id
            .iter()
            .filter(|e| e.agent.tenant_id() == tenant_id)
            .map(|e| Arc::clone(&e.agent))
            .collect()
    }

    pub fn all_agents(&self) -> Vec<Arc<dyn CognitiveAgent>> {
        self.registry
            .by_id
            .iter()
            .map(|e| Arc::clone(&e.agent))
            .collect()
    }

    /// Stats for one agent by id.
    pub fn agent_stats(&self, agent_id: &str) -> AgentResult<AgentStats> {
        self.registry
            .by_id
            .get(agent_id)
            .map(|e| e.agent.stats())
            .ok_or_else(|| AgentError::NotFound {
                agent_id: agent_id.to_string(),
            })
    }

    pub fn stats(&self) -> SchedulerStats {
        let agents: Vec<AgentStats> = self
            .registry
            .by_id
            .iter()
            .map(|e| e.agent.stats())
            .collect();
        SchedulerStats {
            total_agents: agents.len(),
            workers: self.workers,
            agents,
        }
    }

    /// Stop the management task and worker pool.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Dispatch one tick: every agent, highest priority first, each awaited
/// before the next is submitted.
async fn dispatch_tick(registry: &Registry, run_tx: &mpsc::Sender<RunRequest>) {
    for agent in registry.schedule_snapshot() {
        let (reply, rx) = oneshot::channel();
        if run_tx
            .send(RunRequest {
                agent: Arc::clone(&agent),
                reply,
            })
            .await
            .is_err()
        {
            return;
        }
        match rx.await {
            Ok(Err(e)) => {
                tracing::warn!(agent_id = %agent.id(), error = %e, "agent run failed");
            }
            Ok(Ok(())) | Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentState, AgentVitals};
    use crate::error::AgentResult;
    use crate::infer::CancelSignal;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Test agent that records how often it ran.
    struct CountingAgent {
        id: String,
        tenant_id: String,
        priority: i32,
        vitals: AgentVitals,
        runs: AtomicUsize,
        delay: Duration,
        order_log: Option<Arc<std::sync::Mutex<Vec<String>>>>,
    }

    impl CountingAgent {
        fn new(id: &str, priority: i32) -> Self {
            Self {
                id: id.to_string(),
                tenant_id: "demo".to_string(),
                priority,
                vitals: AgentVitals::new(),
                runs: AtomicUsize::new(0),
                delay: Duration::ZERO,
                order_log: None,
            }
        }

        fn with_log(mut self, log: Arc<std::sync::Mutex<Vec<String>>>) -> Self {
            self.order_log = Some(log);
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl CognitiveAgent for CountingAgent {
        fn id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            "CountingAgent"
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
                .stats_for(&self.id, "CountingAgent", &self.tenant_id, self.priority)
        }
        async fn run(&self, _cancel: CancelSignal) -> AgentResult<()> {
            let guard = self.vitals.begin_run();
            if let Some(log) = &self.order_log {
                log.lock().unwrap().push(self.id.clone());
            }
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            self.runs.fetch_add(1, Ordering::Relaxed);
            guard.succeed();
            Ok(())
        }
    }

    /// Capture scheduler logs in test output; repeated calls are no-ops.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    }

    fn fast_scheduler() -> AgentScheduler {
        init_tracing();
        AgentScheduler::new(AgentSchedulerConfig {
            workers: 2,
            tick: Duration::from_millis(20),
            run_deadline: Duration::from_millis(200),
        })
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn registered_agents_run_on_ticks() {
        let scheduler = fast_scheduler();
        let agent = Arc::new(CountingAgent::new("a1", 1));
        scheduler
            .register(Arc::clone(&agent) as Arc<dyn CognitiveAgent>)
            .await
            .unwrap();

        wait_for(|| agent.runs.load(Ordering::Relaxed) >= 3).await;
        assert!(scheduler.get_agent("a1").is_some());
        assert!(agent.stats().run_count >= 3);
        scheduler.close();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn priority_orders_dispatch_within_tick() {
        let scheduler = fast_scheduler();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let low = Arc::new(CountingAgent::new("low", 1).with_log(Arc::clone(&log)));
        let high = Arc::new(CountingAgent::new("high", 10).with_log(Arc::clone(&log)));

        // Register low first; high must still be dispatched first.
        scheduler
            .register(Arc::clone(&low) as Arc<dyn CognitiveAgent>)
            .await
            .unwrap();
        scheduler
            .register(Arc::clone(&high) as Arc<dyn CognitiveAgent>)
            .await
            .unwrap();
        wait_for(|| scheduler.all_agents().len() == 2).await;

        // Ticks are serial and within a tick agents run in priority order,
        // so once "high" appears the log alternates high, low, high, low.
        wait_for(|| {
            let log = log.lock().unwrap();
            log.iter().filter(|e| *e == "high").count() >= 3
        })
        .await;
        let entries = log.lock().unwrap().clone();
        let first_high = entries.iter().position(|e| e == "high").unwrap();
        for (offset, entry) in entries[first_high..].iter().enumerate() {
            let expected = if offset % 2 == 0 { "high" } else { "low" };
            assert_eq!(entry, expected);
        }
        scheduler.close();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unregister_stops_dispatch() {
        let scheduler = fast_scheduler();
        let agent = Arc::new(CountingAgent::new("a1", 1));
        scheduler
            .register(Arc::clone(&agent) as Arc<dyn CognitiveAgent>)
            .await
            .unwrap();
        wait_for(|| agent.runs.load(Ordering::Relaxed) >= 1).await;

        scheduler.unregister("a1").await.unwrap();
        wait_for(|| scheduler.get_agent("a1").is_none()).await;

        let settled = agent.runs.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(100)).await;
        // A dispatch in flight at unregister time may still land; after
        // that, the count must not move.
        assert!(agent.runs.load(Ordering::Relaxed) <= settled + 1);
        scheduler.close();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overrunning_agent_hits_deadline_and_recovers() {
        init_tracing();
        let scheduler = AgentScheduler::new(AgentSchedulerConfig {
            workers: 2,
            tick: Duration::from_millis(20),
            run_deadline: Duration::from_millis(30),
        });
        let slow = Arc::new(
            CountingAgent::new("slow", 1).with_delay(Duration::from_millis(500)),
        );
        scheduler
            .register(Arc::clone(&slow) as Arc<dyn CognitiveAgent>)
            .await
            .unwrap();

        // The run future is dropped at the deadline: the drop guard records
        // the aborted run as an error.
        wait_for(|| slow.state() == AgentState::Error).await;
        assert_eq!(slow.runs.load(Ordering::Relaxed), 0);
        scheduler.close();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tenant_filter_and_stats() {
        let scheduler = fast_scheduler();
        let a = Arc::new(CountingAgent::new("a", 1));
        let mut b = CountingAgent::new("b", 2);
        b.tenant_id = "other".to_string();
        scheduler
            .register(Arc::clone(&a) as Arc<dyn CognitiveAgent>)
            .await
            .unwrap();
        scheduler
            .register(Arc::new(b) as Arc<dyn CognitiveAgent>)
            .await
            .unwrap();
        wait_for(|| scheduler.all_agents().len() == 2).await;

        assert_eq!(scheduler.agents_by_tenant("demo").len(), 1);
        assert_eq!(scheduler.agents_by_tenant("other").len(), 1);
        assert_eq!(scheduler.agents_by_tenant("nobody").len(), 0);

        let stats = scheduler.stats();
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.workers, 2);

        assert_eq!(scheduler.agent_stats("a").unwrap().id, "a");
        assert!(matches!(
            scheduler.agent_stats("ghost").unwrap_err(),
            AgentError::NotFound { .. }
        ));
        scheduler.close();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn register_fails_after_close() {
        let scheduler = fast_scheduler();
        scheduler.close();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = scheduler
            .register(Arc::new(CountingAgent::new("late", 1)) as Arc<dyn CognitiveAgent>)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Closed));
    }
}
