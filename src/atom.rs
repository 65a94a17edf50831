//! Core atom types for the noesis runtime.
//!
//! Atoms are the smallest units of knowledge: a Node (named concept) or a
//! Link (ordered tuple of atoms). Every atom is content-addressed — its
//! [`AtomId`] is a SHA-256 digest of (type, name, outgoing ids) — so two
//! atoms with identical content always share an id. Truth and attention
//! values mutate under a short interior critical section; everything else
//! is immutable after construction.

use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AtomError, AtomResult};

/// Seconds since the UNIX epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// Atom types
// ---------------------------------------------------------------------------

/// Classification of an atom.
///
/// Node kinds carry no outgoing set; Link kinds connect an ordered sequence
/// of atoms (typically two, for binary relations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AtomType {
    Node,
    ConceptNode,
    PredicateNode,
    VariableNode,
    Link,
    InheritanceLink,
    SimilarityLink,
    ExecutionLink,
    EvaluationLink,
}

impl AtomType {
    /// Whether this type carries an outgoing set.
    pub fn is_link(self) -> bool {
        matches!(
            self,
            AtomType::Link
                | AtomType::InheritanceLink
                | AtomType::SimilarityLink
                | AtomType::ExecutionLink
                | AtomType::EvaluationLink
        )
    }

    /// Stable discriminant used in content addressing.
    ///
    /// Must never change for existing variants: ids derived from it are the
    /// identity of every stored atom.
    fn tag(self) -> u8 {
        match self {
            AtomType::Node => 0,
            AtomType::ConceptNode => 1,
            AtomType::PredicateNode => 2,
            AtomType::VariableNode => 3,
            AtomType::Link => 4,
            AtomType::InheritanceLink => 5,
            AtomType::SimilarityLink => 6,
            AtomType::ExecutionLink => 7,
            AtomType::EvaluationLink => 8,
        }
    }
}

impl std::fmt::Display for AtomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AtomType::Node => "Node",
            AtomType::ConceptNode => "ConceptNode",
            AtomType::PredicateNode => "PredicateNode",
            AtomType::VariableNode => "VariableNode",
            AtomType::Link => "Link",
            AtomType::InheritanceLink => "InheritanceLink",
            AtomType::SimilarityLink => "SimilarityLink",
            AtomType::ExecutionLink => "ExecutionLink",
            AtomType::EvaluationLink => "EvaluationLink",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// Truth and attention values
// ---------------------------------------------------------------------------

/// Probabilistic truth: strength (probability the statement holds) and
/// confidence in that strength, both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruthValue {
    pub strength: f64,
    pub confidence: f64,
}

impl TruthValue {
    /// Construct a truth value, rejecting out-of-range components.
    pub fn new(strength: f64, confidence: f64) -> AtomResult<Self> {
        if !(0.0..=1.0).contains(&strength) || !(0.0..=1.0).contains(&confidence) {
            return Err(AtomError::InvalidTruthValue {
                strength,
                confidence,
            });
        }
        Ok(Self {
            strength,
            confidence,
        })
    }
}

impl Default for TruthValue {
    fn default() -> Self {
        Self {
            strength: 1.0,
            confidence: 1.0,
        }
    }
}

/// Importance of an atom: short-, long-, and very-long-term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionValue {
    pub sti: i16,
    pub lti: i16,
    pub vlti: i16,
}

// ---------------------------------------------------------------------------
// Atom identity
// ---------------------------------------------------------------------------

/// Content-derived atom identifier: hex SHA-256 over (type, name, outgoing).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AtomId(String);

impl AtomId {
    /// Derive the id for an atom's content tuple.
    ///
    /// Deterministic: equal (type, name, outgoing ids) always yield the same
    /// id, which is what de-duplicates re-derived atoms during inference.
    pub fn derive(atom_type: AtomType, name: &str, outgoing: &[AtomId]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}", atom_type.tag(), name).as_bytes());
        for id in outgoing {
            hasher.update(id.as_str().as_bytes());
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        AtomId(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AtomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Atom
// ---------------------------------------------------------------------------

/// Truth, attention, and the update timestamp share one lock: they are the
/// only mutable parts of an atom.
#[derive(Debug)]
struct AtomCell {
    truth: TruthValue,
    attention: AttentionValue,
    updated_at: u64,
    update_count: u64,
}

/// A unit of knowledge: a named node, or a link connecting other atoms.
///
/// Atoms are shared as `Arc<Atom>` between indices, query results, and
/// inference snapshots. Identity is content-addressed, so a deleted atom
/// that is still referenced by a surviving link is merely dangling — readers
/// observe stale but internally consistent values.
#[derive(Debug)]
pub struct Atom {
    id: AtomId,
    atom_type: AtomType,
    name: String,
    tenant_id: String,
    created_at: u64,
    outgoing: Vec<Arc<Atom>>,
    cell: RwLock<AtomCell>,
}

impl Atom {
    /// Construct a node atom. The tenant id must be non-empty.
    pub fn node(
        atom_type: AtomType,
        name: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> AtomResult<Self> {
        let name = name.into();
        let tenant_id = tenant_id.into();
        if tenant_id.is_empty() {
            return Err(AtomError::EmptyTenant);
        }
        let id = AtomId::derive(atom_type, &name, &[]);
        Ok(Self::assemble(id, atom_type, name, tenant_id, Vec::new()))
    }

    /// Construct a link atom connecting `outgoing` (at least one atom).
    pub fn link(
        atom_type: AtomType,
        name: impl Into<String>,
        tenant_id: impl Into<String>,
        outgoing: Vec<Arc<Atom>>,
    ) -> AtomResult<Self> {
        let name = name.into();
        let tenant_id = tenant_id.into();
        if tenant_id.is_empty() {
            return Err(AtomError::EmptyTenant);
        }
        if outgoing.is_empty() {
            return Err(AtomError::EmptyOutgoing {
                atom_type: atom_type.to_string(),
            });
        }
        let outgoing_ids: Vec<AtomId> = outgoing.iter().map(|a| a.id.clone()).collect();
        let id = AtomId::derive(atom_type, &name, &outgoing_ids);
        Ok(Self::assemble(id, atom_type, name, tenant_id, outgoing))
    }

    fn assemble(
        id: AtomId,
        atom_type: AtomType,
        name: String,
        tenant_id: String,
        outgoing: Vec<Arc<Atom>>,
    ) -> Self {
        let now = unix_now();
        Self {
            id,
            atom_type,
            name,
            tenant_id,
            created_at: now,
            outgoing,
            cell: RwLock::new(AtomCell {
                truth: TruthValue::default(),
                attention: AttentionValue::default(),
                updated_at: now,
                update_count: 0,
            }),
        }
    }

    /// Set the initial truth value at construction time.
    pub fn with_truth(self, truth: TruthValue) -> Self {
        self.cell.write().expect("atom lock poisoned").truth = truth;
        self
    }

    pub fn id(&self) -> &AtomId {
        &self.id
    }

    pub fn atom_type(&self) -> AtomType {
        self.atom_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn updated_at(&self) -> u64 {
        self.cell.read().expect("atom lock poisoned").updated_at
    }

    /// Ordered atoms this link connects. Empty for nodes.
    pub fn outgoing(&self) -> &[Arc<Atom>] {
        &self.outgoing
    }

    pub fn is_link(&self) -> bool {
        self.atom_type.is_link()
    }

    pub fn truth(&self) -> TruthValue {
        self.cell.read().expect("atom lock poisoned").truth
    }

    pub fn set_truth(&self, truth: TruthValue) {
        let mut cell = self.cell.write().expect("atom lock poisoned");
        cell.truth = truth;
        cell.updated_at = unix_now();
    }

    pub fn attention(&self) -> AttentionValue {
        self.cell.read().expect("atom lock poisoned").attention
    }

    pub fn set_attention(&self, attention: AttentionValue) {
        let mut cell = self.cell.write().expect("atom lock poisoned");
        cell.attention = attention;
        cell.updated_at = unix_now();
    }

    /// How many store-level updates have been applied to this atom.
    pub fn update_count(&self) -> u64 {
        self.cell.read().expect("atom lock poisoned").update_count
    }

    pub(crate) fn record_update(&self) {
        let mut cell = self.cell.write().expect("atom lock poisoned");
        cell.update_count += 1;
        cell.updated_at = unix_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_deterministic() {
        let a = AtomId::derive(AtomType::ConceptNode, "Cat", &[]);
        let b = AtomId::derive(AtomType::ConceptNode, "Cat", &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn id_varies_with_content() {
        let cat = AtomId::derive(AtomType::ConceptNode, "Cat", &[]);
        let dog = AtomId::derive(AtomType::ConceptNode, "Dog", &[]);
        let pred = AtomId::derive(AtomType::PredicateNode, "Cat", &[]);
        assert_ne!(cat, dog);
        assert_ne!(cat, pred);
    }

    #[test]
    fn id_depends_on_outgoing_order() {
        let a = AtomId::derive(AtomType::ConceptNode, "A", &[]);
        let b = AtomId::derive(AtomType::ConceptNode, "B", &[]);
        let ab = AtomId::derive(
            AtomType::InheritanceLink,
            "inheritance",
            &[a.clone(), b.clone()],
        );
        let ba = AtomId::derive(AtomType::InheritanceLink, "inheritance", &[b, a]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn node_defaults() {
        let atom = Atom::node(AtomType::ConceptNode, "Cat", "demo").unwrap();
        assert_eq!(atom.name(), "Cat");
        assert_eq!(atom.tenant_id(), "demo");
        assert_eq!(atom.truth(), TruthValue::default());
        assert_eq!(atom.attention(), AttentionValue::default());
        assert!(atom.outgoing().is_empty());
        assert!(!atom.is_link());
    }

    #[test]
    fn empty_tenant_rejected() {
        let err = Atom::node(AtomType::ConceptNode, "Cat", "").unwrap_err();
        assert!(matches!(err, AtomError::EmptyTenant));
    }

    #[test]
    fn link_requires_outgoing() {
        let err =
            Atom::link(AtomType::InheritanceLink, "inheritance", "demo", vec![]).unwrap_err();
        assert!(matches!(err, AtomError::EmptyOutgoing { .. }));
    }

    #[test]
    fn link_id_matches_derived() {
        let cat = Arc::new(Atom::node(AtomType::ConceptNode, "Cat", "demo").unwrap());
        let mammal = Arc::new(Atom::node(AtomType::ConceptNode, "Mammal", "demo").unwrap());
        let link = Atom::link(
            AtomType::InheritanceLink,
            "inheritance",
            "demo",
            vec![Arc::clone(&cat), Arc::clone(&mammal)],
        )
        .unwrap();
        let expected = AtomId::derive(
            AtomType::InheritanceLink,
            "inheritance",
            &[cat.id().clone(), mammal.id().clone()],
        );
        assert_eq!(link.id(), &expected);
        assert!(link.is_link());
        assert_eq!(link.outgoing().len(), 2);
    }

    #[test]
    fn truth_value_range_checked() {
        assert!(TruthValue::new(0.0, 1.0).is_ok());
        assert!(TruthValue::new(1.1, 0.5).is_err());
        assert!(TruthValue::new(0.5, -0.1).is_err());
    }

    #[test]
    fn set_truth_bumps_updated_at() {
        let atom = Atom::node(AtomType::ConceptNode, "Cat", "demo").unwrap();
        let before = atom.updated_at();
        atom.set_truth(TruthValue::new(0.5, 0.5).unwrap());
        assert!(atom.updated_at() >= before);
        assert_eq!(atom.truth().strength, 0.5);
    }

    #[test]
    fn attention_roundtrip() {
        let atom = Atom::node(AtomType::ConceptNode, "Cat", "demo").unwrap();
        atom.set_attention(AttentionValue {
            sti: 10,
            lti: 2,
            vlti: 1,
        });
        let av = atom.attention();
        assert_eq!((av.sti, av.lti, av.vlti), (10, 2, 1));
    }

    #[test]
    fn with_truth_builder() {
        let tv = TruthValue::new(0.7, 0.8).unwrap();
        let atom = Atom::node(AtomType::ConceptNode, "Cat", "demo")
            .unwrap()
            .with_truth(tv);
        assert_eq!(atom.truth(), tv);
    }

    #[test]
    fn atom_type_link_classification() {
        assert!(AtomType::InheritanceLink.is_link());
        assert!(AtomType::EvaluationLink.is_link());
        assert!(!AtomType::ConceptNode.is_link());
        assert!(!AtomType::VariableNode.is_link());
    }
}
