//! Default inference rules.
//!
//! Deduction chains inheritance transitively, induction derives similarity
//! from co-inheritance, abduction is a registered placeholder. All three
//! operate on snapshots of binary InheritanceLinks whose endpoints are still
//! present in the snapshot; links dangling after a delete are skipped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::atom::{Atom, AtomId, AtomType, TruthValue};
use crate::error::{InferResult, SpaceError};

use super::InferenceRule;

/// Binary inheritance links from the snapshot whose endpoints both resolve,
/// in a deterministic (id-sorted) order.
fn live_inheritance_links(atoms: &[Arc<Atom>]) -> Vec<&Arc<Atom>> {
    let present: HashSet<&AtomId> = atoms.iter().map(|a| a.id()).collect();
    let mut links: Vec<&Arc<Atom>> = atoms
        .iter()
        .filter(|a| a.atom_type() == AtomType::InheritanceLink)
        .filter(|a| a.outgoing().len() == 2)
        .filter(|a| a.outgoing().iter().all(|o| present.contains(o.id())))
        .collect();
    links.sort_by(|a, b| a.id().cmp(b.id()));
    links
}

// ---------------------------------------------------------------------------
// Deduction
// ---------------------------------------------------------------------------

/// Transitive chaining over inheritance: from `A→B` and `B→C`, derive `A→C`
/// with product truth semantics.
///
/// Despite the classical name, this is not modus ponens over arbitrary
/// implications — it is the transitive closure of InheritanceLinks, with
/// `strength = s1·s2` and `confidence = c1·c2·0.9`.
pub struct DeductionRule {
    priority: i32,
}

impl DeductionRule {
    pub fn new() -> Self {
        Self { priority: 10 }
    }
}

impl Default for DeductionRule {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceRule for DeductionRule {
    fn name(&self) -> &str {
        "deduction"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_apply(&self, atoms: &[Arc<Atom>]) -> bool {
        atoms.len() >= 2
            && atoms
                .iter()
                .any(|a| a.atom_type() == AtomType::InheritanceLink)
    }

    fn apply(&self, atoms: &[Arc<Atom>]) -> InferResult<Vec<Arc<Atom>>> {
        let links = live_inheritance_links(atoms);

        let mut new_atoms: Vec<Arc<Atom>> = Vec::new();
        let mut emitted: HashSet<AtomId> = HashSet::new();
        for (i, first) in links.iter().enumerate() {
            for (j, second) in links.iter().enumerate() {
                if i == j {
                    continue;
                }
                // Chain when first's target is second's source.
                if first.outgoing()[1].id() != second.outgoing()[0].id() {
                    continue;
                }

                let source = Arc::clone(&first.outgoing()[0]);
                let target = Arc::clone(&second.outgoing()[1]);
                let tv1 = first.truth();
                let tv2 = second.truth();
                let truth = TruthValue::new(
                    tv1.strength * tv2.strength,
                    tv1.confidence * tv2.confidence * 0.9,
                )
                .map_err(SpaceError::from)?;

                let link = Atom::link(
                    AtomType::InheritanceLink,
                    "inheritance",
                    first.tenant_id(),
                    vec![source, target],
                )
                .map_err(SpaceError::from)?
                .with_truth(truth);

                if emitted.insert(link.id().clone()) {
                    new_atoms.push(Arc::new(link));
                }
            }
        }
        Ok(new_atoms)
    }
}

// ---------------------------------------------------------------------------
// Induction
// ---------------------------------------------------------------------------

/// Co-inheritance similarity: when two or more sources inherit from the same
/// target, every unordered pair of sources gets a SimilarityLink with truth
/// `(0.7, 0.8)`.
pub struct InductionRule {
    priority: i32,
}

impl InductionRule {
    pub fn new() -> Self {
        Self { priority: 5 }
    }
}

impl Default for InductionRule {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceRule for InductionRule {
    fn name(&self) -> &str {
        "induction"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_apply(&self, atoms: &[Arc<Atom>]) -> bool {
        atoms
            .iter()
            .filter(|a| a.atom_type() == AtomType::InheritanceLink)
            .count()
            >= 3
    }

    fn apply(&self, atoms: &[Arc<Atom>]) -> InferResult<Vec<Arc<Atom>>> {
        let links = live_inheritance_links(atoms);

        // Pairs already related by inheritance (either direction) are not
        // similarity candidates: the hierarchy subsumes them. Without this,
        // deduction's derived links would keep feeding induction new pairs.
        let related: HashSet<(&AtomId, &AtomId)> = links
            .iter()
            .map(|l| (l.outgoing()[0].id(), l.outgoing()[1].id()))
            .collect();

        // Group sources by the target they inherit from.
        let mut by_target: HashMap<&AtomId, Vec<&Arc<Atom>>> = HashMap::new();
        for link in &links {
            by_target
                .entry(link.outgoing()[1].id())
                .or_default()
                .push(link);
        }

        let mut targets: Vec<&AtomId> = by_target.keys().copied().collect();
        targets.sort();

        let mut new_atoms: Vec<Arc<Atom>> = Vec::new();
        let mut emitted: HashSet<AtomId> = HashSet::new();
        for target in targets {
            let group = &by_target[target];
            if group.len() < 2 {
                continue;
            }
            // Canonical source order keeps pair emission stable across
            // iterations, so re-derivations always collide on the same id.
            let mut sources: Vec<&Arc<Atom>> =
                group.iter().map(|l| &l.outgoing()[0]).collect();
            sources.sort_by(|a, b| a.id().cmp(b.id()));
            sources.dedup_by(|a, b| a.id() == b.id());

            for i in 0..sources.len() {
                for j in (i + 1)..sources.len() {
                    let (a, b) = (sources[i].id(), sources[j].id());
                    if related.contains(&(a, b)) || related.contains(&(b, a)) {
                        continue;
                    }
                    let truth = TruthValue::new(0.7, 0.8).map_err(SpaceError::from)?;
                    let link = Atom::link(
                        AtomType::SimilarityLink,
                        "similarity",
                        group[0].tenant_id(),
                        vec![Arc::clone(sources[i]), Arc::clone(sources[j])],
                    )
                    .map_err(SpaceError::from)?
                    .with_truth(truth);

                    if emitted.insert(link.id().clone()) {
                        new_atoms.push(Arc::new(link));
                    }
                }
            }
        }
        Ok(new_atoms)
    }
}

// ---------------------------------------------------------------------------
// Abduction
// ---------------------------------------------------------------------------

/// Hypothesis generation placeholder. Registered with the default rule set
/// but produces no atoms; reserved for future abductive reasoning.
pub struct AbductionRule {
    priority: i32,
}

impl AbductionRule {
    pub fn new() -> Self {
        Self { priority: 3 }
    }
}

impl Default for AbductionRule {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceRule for AbductionRule {
    fn name(&self) -> &str {
        "abduction"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_apply(&self, atoms: &[Arc<Atom>]) -> bool {
        atoms.len() >= 2
    }

    fn apply(&self, _atoms: &[Arc<Atom>]) -> InferResult<Vec<Arc<Atom>>> {
        Ok(Vec::new())
    }
}

/// The default rule set every tenant's engine starts with.
pub fn default_rules() -> Vec<Arc<dyn InferenceRule>> {
    vec![
        Arc::new(DeductionRule::new()),
        Arc::new(InductionRule::new()),
        Arc::new(AbductionRule::new()),
    ]
}
