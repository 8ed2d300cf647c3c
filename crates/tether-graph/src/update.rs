//! Canonical updates queued on the graph.

use serde_json::{Map, Value};
use tether_kernel::Identifier;

/// JSON:API-style links object attached to a relationship payload.
pub type Links = Map<String, Value>;

/// Resolved membership carried by a relationship payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Linkage {
    One(Option<Identifier>),
    Many(Vec<Identifier>),
}

impl Linkage {
    pub fn is_to_many(&self) -> bool {
        matches!(self, Linkage::Many(_))
    }

    /// Drop every reference to `identifier`.
    pub(crate) fn strip(&mut self, identifier: Identifier) {
        match self {
            Linkage::One(value) => {
                if *value == Some(identifier) {
                    *value = None;
                }
            }
            Linkage::Many(members) => members.retain(|member| *member != identifier),
        }
    }
}

/// Server-confirmed state for one relationship.
///
/// `data: None` means the payload carried only links and/or meta. That is
/// "membership unknown", never "empty".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalUpdate {
    pub data: Option<Linkage>,
    pub links: Option<Links>,
    pub meta: Option<Value>,
}

impl CanonicalUpdate {
    pub fn one(value: Option<Identifier>) -> Self {
        Self {
            data: Some(Linkage::One(value)),
            ..Self::default()
        }
    }

    pub fn many(members: impl IntoIterator<Item = Identifier>) -> Self {
        Self {
            data: Some(Linkage::Many(members.into_iter().collect())),
            ..Self::default()
        }
    }

    /// A partial payload: links only, no membership.
    pub fn links(links: Links) -> Self {
        Self {
            links: Some(links),
            ..Self::default()
        }
    }

    pub fn with_links(mut self, links: Links) -> Self {
        self.links = Some(links);
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}
