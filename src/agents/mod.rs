//! Autonomous cognitive agents.
//!
//! An agent is a unit of periodic autonomous work: the scheduler dispatches
//! every registered agent once per tick, highest priority first, each run
//! bounded by a deadline. Agents track their own state and timing through
//! [`AgentVitals`]; a run that errors or overruns its deadline leaves the
//! agent in [`AgentState::Error`] until its next successful run.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;

use crate::atom::unix_now;
use crate::error::AgentResult;
use crate::infer::CancelSignal;

pub mod builtin;
pub mod scheduler;

pub use builtin::{AttentionAgent, MindAgent};
pub use scheduler::{AgentScheduler, AgentSchedulerConfig, SchedulerStats};

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AgentState {
    Idle,
    Running,
    Stopped,
    Error,
}

/// Timing and state snapshot for one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStats {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub priority: i32,
    pub state: AgentState,
    pub run_count: u64,
    pub total_time_ms: u64,
    pub avg_time_ms: u64,
    /// Seconds since epoch of the last run, 0 if never run.
    pub last_run: u64,
}

/// An autonomous agent invoked periodically by the scheduler.
#[async_trait]
pub trait CognitiveAgent: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn tenant_id(&self) -> &str;
    /// Higher priority runs earlier within a tick.
    fn priority(&self) -> i32;
    fn state(&self) -> AgentState;
    fn stats(&self) -> AgentStats;
    /// One bounded unit of work. The scheduler enforces the deadline by
    /// dropping the future; implementations record their outcome through a
    /// [`RunGuard`] so an aborted run still lands in `Error` state.
    async fn run(&self, cancel: CancelSignal) -> AgentResult<()>;
}

// ---------------------------------------------------------------------------
// Vitals
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct VitalsInner {
    state: AgentState,
    run_count: u64,
    total_time: Duration,
    last_run: u64,
}

/// Shared state/timing bookkeeping for agent implementations.
#[derive(Debug)]
pub struct AgentVitals {
    inner: Mutex<VitalsInner>,
}

impl AgentVitals {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VitalsInner {
                state: AgentState::Idle,
                run_count: 0,
                total_time: Duration::ZERO,
                last_run: 0,
            }),
        }
    }

    pub fn state(&self) -> AgentState {
        self.inner.lock().expect("vitals lock poisoned").state
    }

    /// Mark the agent running and return a guard that must witness the
    /// outcome. Dropping the guard without completing (the deadline dropped
    /// the run future) records the run as failed.
    pub fn begin_run(&self) -> RunGuard<'_> {
        self.inner.lock().expect("vitals lock poisoned").state = AgentState::Running;
        RunGuard {
            vitals: self,
            start: Instant::now(),
            completed: false,
        }
    }

    fn finish(&self, start: Instant, state: AgentState) {
        let mut inner = self.inner.lock().expect("vitals lock poisoned");
        inner.run_count += 1;
        inner.total_time += start.elapsed();
        inner.last_run = unix_now();
        inner.state = state;
    }

    /// Assemble an [`AgentStats`] snapshot for the owning agent.
    pub fn stats_for(
        &self,
        id: &str,
        name: &str,
        tenant_id: &str,
        priority: i32,
    ) -> AgentStats {
        let inner = self.inner.lock().expect("vitals lock poisoned");
        let total_time_ms = inner.total_time.as_millis() as u64;
        let avg_time_ms = if inner.run_count == 0 {
            0
        } else {
            total_time_ms / inner.run_count
        };
        AgentStats {
            id: id.to_string(),
            name: name.to_string(),
            tenant_id: tenant_id.to_string(),
            priority,
            state: inner.state,
            run_count: inner.run_count,
            total_time_ms,
            avg_time_ms,
            last_run: inner.last_run,
        }
    }
}

impl Default for AgentVitals {
    fn default() -> Self {
        Self::new()
    }
}

/// Witness for one agent run. Consumed by `succeed`/`fail`; dropping it
/// unconsumed counts the run as failed (Error state).
pub struct RunGuard<'a> {
    vitals: &'a AgentVitals,
    start: Instant,
    completed: bool,
}

impl RunGuard<'_> {
    pub fn succeed(mut self) {
        self.completed = true;
        self.vitals.finish(self.start, AgentState::Idle);
    }

    pub fn fail(mut self) {
        self.completed = true;
        self.vitals.finish(self.start, AgentState::Error);
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.vitals.finish(self.start, AgentState::Error);
        }
    }
}
