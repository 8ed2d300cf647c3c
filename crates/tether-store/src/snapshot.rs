//! Read-only view of one record's current projection.

use crate::payload::{Attributes, ResourceLinkage, ResourceReference};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Attributes and relationships as the application currently sees them.
///
/// Every declared relationship of the type is present: an untouched to-one
/// reads as `null` and an untouched to-many as `[]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: Option<String>,
    pub lid: String,
    pub attributes: Attributes,
    pub relationships: BTreeMap<String, ResourceLinkage>,
}

impl Snapshot {
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Target of a to-one relationship. `None` for unknown or to-many names.
    pub fn belongs_to(&self, name: &str) -> Option<&ResourceReference> {
        match self.relationships.get(name) {
            Some(ResourceLinkage::One(reference)) => reference.as_ref(),
            _ => None,
        }
    }

    /// Members of a to-many relationship. Empty for unknown or to-one names.
    pub fn has_many(&self, name: &str) -> &[ResourceReference] {
        match self.relationships.get(name) {
            Some(ResourceLinkage::Many(references)) => references,
            _ => &[],
        }
    }
}
