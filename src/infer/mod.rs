//! Parallel inference over the atomspace.
//!
//! Rules turn a snapshot of a tenant's atoms into new atoms; the engine
//! dispatches them to a worker pool and iterates until a fixpoint (no new
//! atom produced) or an iteration cap. Content addressing is the sole
//! de-duplication mechanism: a re-derived atom fails reinsertion and does
//! not count as progress.

use std::sync::Arc;

use tokio::sync::watch;

use crate::atom::{Atom, TruthValue};
use crate::error::InferResult;

pub mod engine;
pub mod rules;

pub use engine::{InferenceEngine, InferenceOutcome, InferenceStats};
pub use rules::{default_rules, AbductionRule, DeductionRule, InductionRule};

/// Cancellation signal observed by long-running operations.
///
/// Fired by sending `true` on the paired sender. Inference checks it at the
/// top of each iteration; in-flight rule tasks are allowed to finish.
pub type CancelSignal = watch::Receiver<bool>;

/// A signal that never fires. Convenience for callers without a deadline.
pub fn no_cancel() -> CancelSignal {
    let (_tx, rx) = watch::channel(false);
    rx
}

/// A cancellation pair: fire by sending `true` on the sender.
pub fn cancel_pair() -> (watch::Sender<bool>, CancelSignal) {
    watch::channel(false)
}

/// An inference rule: a cheap applicability guard plus a producer that maps
/// an atom snapshot to new atoms.
///
/// Rules are applied to the entire current snapshot, not only to freshly
/// created atoms. Priority is informational; the engine applies rules in
/// registration order.
pub trait InferenceRule: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> i32;
    /// Cheap guard deciding whether `apply` is worth dispatching.
    fn can_apply(&self, atoms: &[Arc<Atom>]) -> bool;
    /// Produce new atoms from the snapshot.
    fn apply(&self, atoms: &[Arc<Atom>]) -> InferResult<Vec<Arc<Atom>>>;
}

/// Revision of two independently sourced beliefs about the same statement.
///
/// Confidence-weighted mean of strengths with a geometric-mean confidence.
/// Not applied automatically to inferred atoms (those combine truth with
/// the product formula inside each rule); this is a utility for callers
/// merging evidence.
pub fn revise(a: TruthValue, b: TruthValue) -> TruthValue {
    let (w1, w2) = (a.confidence, b.confidence);
    if w1 + w2 == 0.0 {
        return TruthValue {
            strength: 0.5,
            confidence: 0.0,
        };
    }
    TruthValue {
        strength: (a.strength * w1 + b.strength * w2) / (w1 + w2),
        confidence: (a.confidence * b.confidence).sqrt(),
    }
}
