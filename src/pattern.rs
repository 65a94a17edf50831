//! Pattern matching over a tenant's atoms.
//!
//! A pattern is a type plus an optional name; matching is a filtered query
//! against the store. Kept deliberately small — richer structural matching
//! belongs to the inference rules.

use std::sync::Arc;

use crate::atom::{Atom, AtomType};
use crate::error::SpaceResult;
use crate::space::{AtomFilter, AtomStore};

/// A type-and-name pattern. `name: None` matches any name.
#[derive(Debug, Clone)]
pub struct AtomPattern {
    pub atom_type: AtomType,
    pub name: Option<String>,
}

impl AtomPattern {
    pub fn of_type(atom_type: AtomType) -> Self {
        Self {
            atom_type,
            name: None,
        }
    }

    pub fn named(atom_type: AtomType, name: impl Into<String>) -> Self {
        Self {
            atom_type,
            name: Some(name.into()),
        }
    }
}

/// Finds atoms matching a pattern within one tenant.
pub struct PatternMatcher {
    store: Arc<dyn AtomStore>,
}

impl PatternMatcher {
    pub fn new(store: Arc<dyn AtomStore>) -> Self {
        Self { store }
    }

    pub async fn match_pattern(
        &self,
        tenant_id: &str,
        pattern: &AtomPattern,
    ) -> SpaceResult<Vec<Arc<Atom>>> {
        let atom_type = pattern.atom_type;
        let name = pattern.name.clone();
        let filter: AtomFilter = Arc::new(move |a: &Atom| {
            a.atom_type() == atom_type && name.as_deref().map_or(true, |n| a.name() == n)
        });
        self.store.query_atoms(tenant_id, Some(filter)).await
    }
}
