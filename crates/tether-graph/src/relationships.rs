//! Per-entity relationship container.

use crate::relationship::RelationshipKey;
use std::collections::BTreeMap;
use tether_kernel::Identifier;

/// Relationship name → relationship handle for exactly one identifier.
///
/// The graph creates a container on first lookup of the identifier and
/// fills entries lazily as names are accessed. Containers are never shared
/// between identifiers.
#[derive(Debug, Clone)]
pub struct Relationships {
    owner: Identifier,
    entries: BTreeMap<String, RelationshipKey>,
}

impl Relationships {
    pub(crate) fn new(owner: Identifier) -> Self {
        Self {
            owner,
            entries: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> Identifier {
        self.owner
    }

    /// Handle of an already materialized relationship.
    pub fn get(&self, name: &str) -> Option<RelationshipKey> {
        self.entries.get(name).copied()
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Materialized names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, RelationshipKey)> {
        self.entries.iter().map(|(name, key)| (name.as_str(), *key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&mut self, name: &str, key: RelationshipKey) {
        self.entries.insert(name.to_string(), key);
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = RelationshipKey> + '_ {
        self.entries.values().copied()
    }
}
