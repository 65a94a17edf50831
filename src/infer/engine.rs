//! Fixpoint inference engine with a rule-dispatch worker pool.
//!
//! One engine per tenant. Each iteration snapshots the tenant's atoms,
//! dispatches every applicable rule to the pool, reinserts produced atoms in
//! arrival order, and stops when an iteration adds nothing new (fixpoint),
//! no rule applies, the tenant is empty, or the iteration cap is reached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

use crate::atom::{unix_now, Atom};
use crate::error::{InferError, InferResult};
use crate::space::AtomStore;

use super::{CancelSignal, InferenceRule};

const TASK_QUEUE_DEPTH: usize = 1000;

struct RuleTask {
    atoms: Arc<Vec<Arc<Atom>>>,
    rule: Arc<dyn InferenceRule>,
    reply: mpsc::Sender<RuleOutcome>,
}

struct RuleOutcome {
    rule: String,
    result: InferResult<Vec<Arc<Atom>>>,
}

/// Result of one `run_inference` call.
#[derive(Debug, Clone)]
pub struct InferenceOutcome {
    /// Atoms produced and successfully reinserted, in reinsertion order.
    pub new_atoms: Vec<Arc<Atom>>,
    /// Iterations actually executed.
    pub iterations: usize,
    /// Whether the loop stopped because an iteration made no progress.
    pub reached_fixpoint: bool,
}

/// Cumulative statistics for an engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InferenceStats {
    /// Total atoms produced across all runs.
    pub total_inferences: u64,
    /// Per-rule count of successful applications.
    pub successful_rules: HashMap<String, u64>,
    /// Per-rule count of failed applications.
    pub failed_rules: HashMap<String, u64>,
    /// Seconds since epoch of the last completed run.
    pub last_run: u64,
}

/// Per-tenant parallel inference engine.
pub struct InferenceEngine {
    store: Arc<dyn AtomStore>,
    rules: RwLock<Vec<Arc<dyn InferenceRule>>>,
    task_tx: mpsc::Sender<RuleTask>,
    shutdown_tx: watch::Sender<bool>,
    stats: Mutex<InferenceStats>,
}

impl InferenceEngine {
    /// Create an engine over `store` with `workers` rule-dispatch tasks.
    pub fn new(store: Arc<dyn AtomStore>, workers: usize) -> Self {
        let (task_tx, task_rx) = mpsc::channel::<RuleTask>(TASK_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task_rx = Arc::new(AsyncMutex::new(task_rx));
        for _ in 0..workers.max(1) {
            let task_rx = Arc::clone(&task_rx);
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        task = async { task_rx.lock().await.recv().await } => {
                            let Some(task) = task else { break };
                            let outcome = RuleOutcome {
                                rule: task.rule.name().to_string(),
                                result: task.rule.apply(&task.atoms),
                            };
                            // The driver may have abandoned the run; nothing
                            // to do with the outcome then.
                            let _ = task.reply.send(outcome).await;
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

        Self {
            store,
            rules: RwLock::new(Vec::new()),
            task_tx,
            shutdown_tx,
            stats: Mutex::new(InferenceStats::default()),
        }
    }

    /// Register a rule. Must not race a running fixpoint; the engine clones
    /// the rule list under the read lock at each iteration.
    pub fn add_rule(&self, rule: Arc<dyn InferenceRule>) {
        self.rules
            .write()
            .expect("rule registry lock poisoned")
            .push(rule);
    }

    /// Names of the registered rules, in registration order.
    pub fn rule_names(&self) -> Vec<String> {
        self.rules
            .read()
            .expect("rule registry lock poisoned")
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    /// Snapshot of the engine's cumulative statistics.
    pub fn stats(&self) -> InferenceStats {
        self.stats.lock().expect("stats lock poisoned").clone()
    }

    /// Iterate rule application to a fixpoint.
    ///
    /// The cancellation signal is honored at the top of each iteration: the
    /// run returns [`InferError::Cancelled`] and atoms reinserted by earlier
    /// iterations remain in the store.
    pub async fn run_inference(
        &self,
        tenant_id: &str,
        max_iterations: usize,
        cancel: &CancelSignal,
    ) -> InferResult<InferenceOutcome> {
        let mut accumulated: Vec<Arc<Atom>> = Vec::new();
        let mut iterations = 0;
        let mut reached_fixpoint = false;

        for iteration in 0..max_iterations {
            if *cancel.borrow() {
                tracing::debug!(tenant_id, iteration, "inference cancelled");
                return Err(InferError::Cancelled { iteration });
            }
            iterations = iteration + 1;

            let atoms = self.store.query_atoms(tenant_id, None).await?;
            if atoms.is_empty() {
                reached_fixpoint = true;
                break;
            }
            let snapshot = Arc::new(atoms);

            let rules: Vec<Arc<dyn InferenceRule>> = self
                .rules
                .read()
                .expect("rule registry lock poisoned")
                .clone();

            // Each run collects results on its own channel so concurrent
            // runs on the same engine cannot steal each other's outcomes.
            let (reply_tx, mut reply_rx) = mpsc::channel(rules.len().max(1));
            let mut submitted = 0;
            for rule in rules {
                if rule.can_apply(&snapshot) {
                    self.task_tx
                        .send(RuleTask {
                            atoms: Arc::clone(&snapshot),
                            rule,
                            reply: reply_tx.clone(),
                        })
                        .await
                        .map_err(|_| InferError::Closed)?;
                    submitted += 1;
                }
            }
            drop(reply_tx);

            if submitted == 0 {
                reached_fixpoint = true;
                break;
            }

            let mut added_this_iter = 0u64;
            for _ in 0..submitted {
                let Some(outcome) = reply_rx.recv().await else {
                    return Err(InferError::Closed);
                };
                match outcome.result {
                    Err(e) => {
                        tracing::warn!(
                            rule = %outcome.rule,
                            error = %e,
                            "rule task failed, skipping",
                        );
                        self.record_rule(&outcome.rule, false);
                    }
                    Ok(new_atoms) => {
                        self.record_rule(&outcome.rule, true);
                        for atom in new_atoms {
                            // AlreadyExists here is the dedup path: the atom
                            // was derived before and counts as no progress.
                            if self.store.add_atom(Arc::clone(&atom)).await.is_ok() {
                                accumulated.push(atom);
                                added_this_iter += 1;
                            }
                        }
                    }
                }
            }

            if added_this_iter > 0 {
                self.stats
                    .lock()
                    .expect("stats lock poisoned")
                    .total_inferences += added_this_iter;
            } else {
                reached_fixpoint = true;
                break;
            }
        }

        {
            let mut stats = self.stats.lock().expect("stats lock poisoned");
            stats.last_run = unix_now();
        }
        tracing::debug!(
            tenant_id,
            iterations,
            new_atoms = accumulated.len(),
            reached_fixpoint,
            "inference run complete",
        );

        Ok(InferenceOutcome {
            new_atoms: accumulated,
            iterations,
            reached_fixpoint,
        })
    }

    fn record_rule(&self, rule: &str, success: bool) {
        let mut stats = self.stats.lock().expect("stats lock poisoned");
        let bucket = if success {
            &mut stats.successful_rules
        } else {
            &mut stats.failed_rules
        };
        *bucket.entry(rule.to_string()).or_insert(0) += 1;
    }

    /// Stop the rule-dispatch workers. Runs after close fail with
    /// [`InferError::Closed`].
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{AtomType, TruthValue};
    use crate::infer::rules::default_rules;
    use crate::infer::{cancel_pair, no_cancel};
    use crate::space::AtomSpace;

    async fn seeded_engine() -> (Arc<AtomSpace>, InferenceEngine) {
        let space = Arc::new(AtomSpace::new(2));
        let engine = InferenceEngine::new(Arc::clone(&space) as Arc<dyn AtomStore>, 4);
        for rule in default_rules() {
            engine.add_rule(rule);
        }
        (space, engine)
    }

    async fn concept(space: &AtomSpace, name: &str) -> Arc<Atom> {
        let atom = Arc::new(Atom::node(AtomType::ConceptNode, name, "demo").unwrap());
        space.add_atom(Arc::clone(&atom)).await.unwrap();
        atom
    }

    async fn inherit(space: &AtomSpace, source: &Arc<Atom>, target: &Arc<Atom>) -> Arc<Atom> {
        let link = Arc::new(
            Atom::link(
                AtomType::InheritanceLink,
                "inheritance",
                "demo",
                vec![Arc::clone(source), Arc::clone(target)],
            )
            .unwrap(),
        );
        space.add_atom(Arc::clone(&link)).await.unwrap();
        link
    }

    #[tokio::test]
    async fn transitive_deduction_to_fixpoint() {
        let (space, engine) = seeded_engine().await;
        let cat = concept(&space, "Cat").await;
        let mammal = concept(&space, "Mammal").await;
        let animal = concept(&space, "Animal").await;
        inherit(&space, &cat, &mammal).await;
        inherit(&space, &mammal, &animal).await;

        let outcome = engine
            .run_inference("demo", 5, &no_cancel())
            .await
            .unwrap();
        assert_eq!(outcome.new_atoms.len(), 1);
        assert!(outcome.reached_fixpoint);

        let link = &outcome.new_atoms[0];
        assert_eq!(link.atom_type(), AtomType::InheritanceLink);
        assert_eq!(link.outgoing()[0].id(), cat.id());
        assert_eq!(link.outgoing()[1].id(), animal.id());
        let tv = link.truth();
        assert!((tv.strength - 1.0).abs() < 1e-9);
        assert!((tv.confidence - 0.9).abs() < 1e-9);

        // Idempotent once at fixpoint.
        let again = engine
            .run_inference("demo", 5, &no_cancel())
            .await
            .unwrap();
        assert!(again.new_atoms.is_empty());
        assert!(again.reached_fixpoint);

        engine.close();
        space.close();
    }

    #[tokio::test]
    async fn chain_closure_is_cap_independent_once_saturated() {
        let (space, engine) = seeded_engine().await;
        let mut nodes = Vec::new();
        for i in 0..5 {
            nodes.push(concept(&space, &format!("N{i}")).await);
        }
        for pair in nodes.windows(2) {
            inherit(&space, &pair[0], &pair[1]).await;
        }

        // Closure of a 5-node chain: 6 missing transitive edges.
        let outcome = engine
            .run_inference("demo", 10, &no_cancel())
            .await
            .unwrap();
        let inherited = outcome
            .new_atoms
            .iter()
            .filter(|a| a.atom_type() == AtomType::InheritanceLink)
            .count();
        assert_eq!(inherited, 6);
        assert!(outcome.reached_fixpoint);

        engine.close();
        space.close();
    }

    #[tokio::test]
    async fn empty_tenant_returns_immediately() {
        let (space, engine) = seeded_engine().await;
        let outcome = engine
            .run_inference("demo", 5, &no_cancel())
            .await
            .unwrap();
        assert!(outcome.new_atoms.is_empty());
        assert_eq!(outcome.iterations, 1);
        engine.close();
        space.close();
    }

    #[tokio::test]
    async fn zero_iterations_do_no_work() {
        let (space, engine) = seeded_engine().await;
        concept(&space, "Cat").await;
        let outcome = engine
            .run_inference("demo", 0, &no_cancel())
            .await
            .unwrap();
        assert!(outcome.new_atoms.is_empty());
        assert_eq!(outcome.iterations, 0);
        engine.close();
        space.close();
    }

    #[tokio::test]
    async fn pre_fired_cancel_returns_cancelled() {
        let (space, engine) = seeded_engine().await;
        concept(&space, "Cat").await;

        let (tx, rx) = cancel_pair();
        tx.send(true).unwrap();
        let err = engine.run_inference("demo", 5, &rx).await.unwrap_err();
        assert!(matches!(err, InferError::Cancelled { iteration: 0 }));
        engine.close();
        space.close();
    }

    #[tokio::test]
    async fn failing_rule_is_skipped() {
        struct FailingRule;
        impl InferenceRule for FailingRule {
            fn name(&self) -> &str {
                "failing"
            }
            fn priority(&self) -> i32 {
                1
            }
            fn can_apply(&self, _atoms: &[Arc<Atom>]) -> bool {
                true
            }
            fn apply(&self, _atoms: &[Arc<Atom>]) -> InferResult<Vec<Arc<Atom>>> {
                Err(InferError::RuleFailure {
                    rule: "failing".into(),
                    message: "synthetic".into(),
                })
            }
        }

        let space = Arc::new(AtomSpace::new(2));
        let engine = InferenceEngine::new(Arc::clone(&space) as Arc<dyn AtomStore>, 2);
        engine.add_rule(Arc::new(FailingRule));
        for rule in default_rules() {
            engine.add_rule(rule);
        }

        let cat = concept(&space, "Cat").await;
        let mammal = concept(&space, "Mammal").await;
        let animal = concept(&space, "Animal").await;
        inherit(&space, &cat, &mammal).await;
        inherit(&space, &mammal, &animal).await;

        // The failing rule contributes nothing but does not abort the run.
        let outcome = engine
            .run_inference("demo", 5, &no_cancel())
            .await
            .unwrap();
        assert_eq!(outcome.new_atoms.len(), 1);

        let stats = engine.stats();
        assert!(stats.failed_rules["failing"] >= 1);
        assert!(stats.successful_rules["deduction"] >= 1);
        assert_eq!(stats.total_inferences, 1);

        engine.close();
        space.close();
    }

    #[tokio::test]
    async fn inferred_atoms_keep_their_tenant() {
        let (space, engine) = seeded_engine().await;
        let cat = concept(&space, "Cat").await;
        let mammal = concept(&space, "Mammal").await;
        let animal = concept(&space, "Animal").await;
        inherit(&space, &cat, &mammal).await;
        inherit(&space, &mammal, &animal).await;

        let outcome = engine
            .run_inference("demo", 5, &no_cancel())
            .await
            .unwrap();
        assert!(outcome.new_atoms.iter().all(|a| a.tenant_id() == "demo"));
        engine.close();
        space.close();
    }

    #[tokio::test]
    async fn abduction_alone_makes_no_progress() {
        let space = Arc::new(AtomSpace::new(2));
        let engine = InferenceEngine::new(Arc::clone(&space) as Arc<dyn AtomStore>, 2);
        engine.add_rule(Arc::new(crate::infer::rules::AbductionRule::new()));

        concept(&space, "Cat").await;
        concept(&space, "Dog").await;

        let outcome = engine
            .run_inference("demo", 5, &no_cancel())
            .await
            .unwrap();
        assert!(outcome.new_atoms.is_empty());
        assert!(outcome.reached_fixpoint);
        engine.close();
        space.close();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closed_engine_rejects_runs() {
        let (space, engine) = seeded_engine().await;
        concept(&space, "Cat").await;
        concept(&space, "Dog").await;
        engine.close();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let err = engine
            .run_inference("demo", 5, &no_cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, InferError::Closed));
        space.close();
    }

    #[tokio::test]
    async fn derived_truth_composes_along_chain() {
        let (space, engine) = seeded_engine().await;
        let a = concept(&space, "A").await;
        let b = concept(&space, "B").await;
        let c = concept(&space, "C").await;
        let ab = inherit(&space, &a, &b).await;
        let bc = inherit(&space, &b, &c).await;
        ab.set_truth(TruthValue::new(0.9, 1.0).unwrap());
        bc.set_truth(TruthValue::new(0.8, 1.0).unwrap());

        let outcome = engine
            .run_inference("demo", 5, &no_cancel())
            .await
            .unwrap();
        let ac = outcome
            .new_atoms
            .iter()
            .find(|l| {
                l.atom_type() == AtomType::InheritanceLink
                    && l.outgoing()[0].id() == a.id()
                    && l.outgoing()[1].id() == c.id()
            })
            .expect("A→C derived");
        let tv = ac.truth();
        assert!((tv.strength - 0.72).abs() < 1e-9);
        assert!((tv.confidence - 0.9).abs() < 1e-9);
        engine.close();
        space.close();
    }
}
