//! Rich diagnostic error types for the noesis runtime.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]`
//! derives, providing error codes and help text so embedders know exactly
//! what went wrong and how to fix it. The kinds map one-to-one onto the
//! runtime's user-visible failure taxonomy (already-exists, not-found,
//! tenant-mismatch, invalid-input, cancelled, deadline-exceeded, closed,
//! stage-failed).

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the noesis runtime.
///
/// Each variant wraps a subsystem-specific error, preserving the full
/// diagnostic chain (error codes, help text, sources) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum NoesisError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Atom(#[from] AtomError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Space(#[from] SpaceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Shard(#[from] ShardError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Infer(#[from] InferError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Atom errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum AtomError {
    #[error("truth value out of range: strength {strength}, confidence {confidence}")]
    #[diagnostic(
        code(noesis::atom::invalid_truth_value),
        help(
            "Both strength and confidence must lie in [0, 1]. \
             Check the formula producing these values, or clamp them \
             before constructing the TruthValue."
        )
    )]
    InvalidTruthValue { strength: f64, confidence: f64 },

    #[error("tenant id must not be empty")]
    #[diagnostic(
        code(noesis::atom::empty_tenant),
        help(
            "Every atom is scoped to a tenant namespace. Pass the tenant id \
             the atom should be visible under."
        )
    )]
    EmptyTenant,

    #[error("link of type {atom_type} has an empty outgoing set")]
    #[diagnostic(
        code(noesis::atom::empty_outgoing),
        help(
            "A link must connect at least one atom (binary relations use two). \
             Construct the endpoint atoms first and pass them as outgoing."
        )
    )]
    EmptyOutgoing { atom_type: String },
}

// ---------------------------------------------------------------------------
// AtomSpace errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SpaceError {
    #[error("atom with id {id} already exists")]
    #[diagnostic(
        code(noesis::space::already_exists),
        help(
            "Atom ids are content-addressed: an identical (type, name, outgoing) \
             tuple always produces the same id. The atom is already stored — \
             fetch it with get_atom instead of re-adding it."
        )
    )]
    AlreadyExists { id: String },

    #[error("atom with id {id} not found")]
    #[diagnostic(
        code(noesis::space::not_found),
        help("No atom with this id exists in the store. Verify the id, or add the atom first.")
    )]
    NotFound { id: String },

    #[error("atom {id} does not belong to tenant {tenant_id}")]
    #[diagnostic(
        code(noesis::space::tenant_mismatch),
        help(
            "The atom exists but is owned by a different tenant. Atoms are only \
             observable to queries bearing their own tenant id."
        )
    )]
    TenantMismatch { id: String, tenant_id: String },

    #[error("atomspace is closed")]
    #[diagnostic(
        code(noesis::space::closed),
        help("The store's worker pool has shut down. Operations after close() are rejected.")
    )]
    Closed,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Atom(#[from] AtomError),
}

// ---------------------------------------------------------------------------
// Shard manager errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ShardError {
    #[error("invalid shard id {shard_id} (shard count is {num_shards})")]
    #[diagnostic(
        code(noesis::shard::invalid_shard),
        help("Shard ids range from 0 to num_shards - 1.")
    )]
    InvalidShard { shard_id: usize, num_shards: usize },

    #[error("shard manager is closed")]
    #[diagnostic(
        code(noesis::shard::closed),
        help("The router workers have shut down. Operations after close() are rejected.")
    )]
    Closed,
}

// ---------------------------------------------------------------------------
// Inference errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum InferError {
    #[error("inference cancelled at iteration {iteration}")]
    #[diagnostic(
        code(noesis::infer::cancelled),
        help(
            "The caller's cancellation signal fired before the fixpoint was \
             reached. Atoms reinserted by completed iterations remain in the \
             store; re-running inference resumes from that state."
        )
    )]
    Cancelled { iteration: usize },

    #[error("rule {rule} failed: {message}")]
    #[diagnostic(
        code(noesis::infer::rule_failure),
        help(
            "A rule body returned an error. Failed rule tasks are skipped by \
             the fixpoint driver; this error surfaces only when a rule is \
             applied directly."
        )
    )]
    RuleFailure { rule: String, message: String },

    #[error("inference engine is closed")]
    #[diagnostic(
        code(noesis::infer::closed),
        help("The rule dispatch pool has shut down. Operations after close() are rejected.")
    )]
    Closed,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Atom(#[from] AtomError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Space(#[from] SpaceError),
}

// ---------------------------------------------------------------------------
// Agent errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("agent {agent_id} not found")]
    #[diagnostic(
        code(noesis::agent::not_found),
        help("No agent with this id is registered. List agents with all_agents().")
    )]
    NotFound { agent_id: String },

    #[error("agent {agent_id} exceeded its run deadline of {deadline_ms}ms")]
    #[diagnostic(
        code(noesis::agent::deadline_exceeded),
        help(
            "Every agent run is bounded by the scheduler's per-run deadline. \
             The agent was aborted at its next suspension point; it will be \
             dispatched again on the next tick."
        )
    )]
    DeadlineExceeded { agent_id: String, deadline_ms: u64 },

    #[error("agent scheduler is closed")]
    #[diagnostic(
        code(noesis::agent::closed),
        help("The scheduler's worker pool has shut down. Operations after close() are rejected.")
    )]
    Closed,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Infer(#[from] InferError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Space(#[from] SpaceError),
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("pipeline {id} already exists")]
    #[diagnostic(
        code(noesis::pipeline::already_exists),
        help("Pipeline ids are unique within the orchestrator. Choose a different id.")
    )]
    AlreadyExists { id: String },

    #[error("pipeline {id} not found")]
    #[diagnostic(
        code(noesis::pipeline::not_found),
        help("No pipeline with this id is registered. Create it first with create_pipeline.")
    )]
    NotFound { id: String },

    #[error("pipeline cancelled before stage {stage_index}")]
    #[diagnostic(
        code(noesis::pipeline::cancelled),
        help(
            "The caller's cancellation signal fired mid-execution. Side effects \
             of completed stages are preserved; there is no rollback."
        )
    )]
    Cancelled { stage_index: usize },

    #[error("stage {stage_name} expected {expected} data, got {actual}")]
    #[diagnostic(
        code(noesis::pipeline::incompatible_data),
        help(
            "The output of the previous stage is not compatible with this \
             stage's input. Check the stage ordering — e.g. AtomIngestion \
             consumes an atom collection, not an empty input."
        )
    )]
    IncompatibleData {
        stage_name: String,
        expected: String,
        actual: String,
    },

    #[error("stage {stage_name} execution failed: {message}")]
    #[diagnostic(
        code(noesis::pipeline::stage_execution),
        help("An individual pipeline stage encountered an error during execution.")
    )]
    StageExecution { stage_name: String, message: String },

    #[error("pipeline {pipeline_name} failed at stage {stage_index} ({stage_name})")]
    #[diagnostic(
        code(noesis::pipeline::stage_failed),
        help(
            "A pipeline stage failed and the pipeline was aborted at that \
             stage. Side effects of earlier stages are preserved. Check the \
             inner error for details."
        )
    )]
    StageFailed {
        pipeline_name: String,
        stage_name: String,
        stage_index: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("pipeline orchestrator is closed")]
    #[diagnostic(
        code(noesis::pipeline::closed),
        help("The orchestrator's worker pool has shut down. Operations after close() are rejected.")
    )]
    Closed,
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("tenant {tenant_id} already initialized")]
    #[diagnostic(
        code(noesis::engine::tenant_already_exists),
        help(
            "initialize_tenant is one-shot per tenant: it creates the tenant's \
             inference engine and default agent. The tenant is already set up."
        )
    )]
    TenantAlreadyExists { tenant_id: String },

    #[error("tenant {tenant_id} not initialized")]
    #[diagnostic(
        code(noesis::engine::tenant_not_initialized),
        help("Call initialize_tenant before running inference or creating default pipelines.")
    )]
    TenantNotInitialized { tenant_id: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(noesis::engine::invalid_config),
        help("Check the Config fields. {message}")
    )]
    InvalidConfig { message: String },

    #[error("cognitive engine is closed")]
    #[diagnostic(
        code(noesis::engine::closed),
        help("The engine has been shut down. A second close() is a no-op, but other operations fail.")
    )]
    Closed,
}

/// Convenience alias for functions returning noesis results.
pub type NoesisResult<T> = std::result::Result<T, NoesisError>;

/// Result type for atom model operations.
pub type AtomResult<T> = std::result::Result<T, AtomError>;

/// Result type for atomspace operations.
pub type SpaceResult<T> = std::result::Result<T, SpaceError>;

/// Result type for shard manager operations.
pub type ShardResult<T> = std::result::Result<T, ShardError>;

/// Result type for inference operations.
pub type InferResult<T> = std::result::Result<T, InferError>;

/// Result type for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Result type for façade operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_error_converts_to_noesis_error() {
        let err = SpaceError::AlreadyExists { id: "abc".into() };
        let top: NoesisError = err.into();
        assert!(matches!(
            top,
            NoesisError::Space(SpaceError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn atom_error_nests_through_space_error() {
        let err = AtomError::EmptyTenant;
        let space: SpaceError = err.into();
        assert!(matches!(space, SpaceError::Atom(AtomError::EmptyTenant)));
    }

    #[test]
    fn infer_error_wraps_space_error() {
        let space = SpaceError::Closed;
        let infer: InferError = space.into();
        assert!(matches!(infer, InferError::Space(SpaceError::Closed)));
    }

    #[test]
    fn stage_failed_preserves_source() {
        let inner = PipelineError::StageExecution {
            stage_name: "inference".into(),
            message: "engine closed".into(),
        };
        let err = PipelineError::StageFailed {
            pipeline_name: "default".into(),
            stage_name: "inference".into(),
            stage_index: 1,
            source: Box::new(inner),
        };
        let msg = format!("{err}");
        assert!(msg.contains("failed at stage 1"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = AtomError::InvalidTruthValue {
            strength: 1.5,
            confidence: -0.2,
        };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));
        assert!(msg.contains("-0.2"));
    }
}
