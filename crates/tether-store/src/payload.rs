//! Normalized resource payloads as they arrive from the network layer.
//!
//! A relationship value takes one of four JSON forms:
//!
//! ```text
//! {"type": "post", "id": "1"}                      to-one reference
//! null                                             to-one cleared
//! [{"type": "comment", "id": "1"}, ...]            to-many membership
//! {"data": ..., "links": {...}, "meta": {...}}     document; `data` optional
//! ```
//!
//! A document without `data` is partial: membership is unknown, not empty.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tether_graph::Links;

/// Attribute bag of one resource.
pub type Attributes = Map<String, Value>;

/// Pointer to another resource by server id and/or local id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceReference {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
}

impl ResourceReference {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: Some(id.into()),
            lid: None,
        }
    }

    /// Reference to a record that only has a local id so far.
    pub fn local(type_name: impl Into<String>, lid: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            lid: Some(lid.into()),
        }
    }
}

/// Membership part of a relationship value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceLinkage {
    Many(Vec<ResourceReference>),
    One(Option<ResourceReference>),
}

impl ResourceLinkage {
    pub fn is_to_many(&self) -> bool {
        matches!(self, ResourceLinkage::Many(_))
    }
}

/// `{data?, links?, meta?}` relationship document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDocument {
    /// `None` when the key is absent. A present `null` is `Some(One(None))`.
    #[serde(
        default,
        deserialize_with = "present_linkage",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<ResourceLinkage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

fn present_linkage<'de, D>(deserializer: D) -> Result<Option<ResourceLinkage>, D::Error>
where
    D: Deserializer<'de>,
{
    ResourceLinkage::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipValue {
    Linkage(ResourceLinkage),
    Document(RelationshipDocument),
}

impl RelationshipValue {
    pub fn one(reference: Option<ResourceReference>) -> Self {
        RelationshipValue::Linkage(ResourceLinkage::One(reference))
    }

    pub fn many(references: impl IntoIterator<Item = ResourceReference>) -> Self {
        RelationshipValue::Linkage(ResourceLinkage::Many(references.into_iter().collect()))
    }

    /// Split into membership, links and meta.
    pub fn into_parts(self) -> (Option<ResourceLinkage>, Option<Links>, Option<Value>) {
        match self {
            RelationshipValue::Linkage(linkage) => (Some(linkage), None, None),
            RelationshipValue::Document(document) => {
                (document.data, document.links, document.meta)
            }
        }
    }
}

/// One resource in normalized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResource {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipValue>,
}

impl NormalizedResource {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: Some(id.into()),
            lid: None,
            attributes: Attributes::new(),
            relationships: BTreeMap::new(),
        }
    }

    pub fn with_lid(mut self, lid: impl Into<String>) -> Self {
        self.lid = Some(lid.into());
        self
    }

    pub fn with_attribute(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn with_relationship(mut self, name: &str, value: RelationshipValue) -> Self {
        self.relationships.insert(name.to_string(), value);
        self
    }
}
