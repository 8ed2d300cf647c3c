//! Relationship state machine: one named field on one entity.
//!
//! Each relationship keeps two layers:
//!
//! ```text
//! canonical   server-confirmed membership, response order
//! overlay     optimistic local edits not yet confirmed
//! current     canonical ⊕ overlay, computed on every read
//! ```
//!
//! A relationship never reaches across to its inverse. The [`Graph`] owns
//! every relationship and performs the mirroring; the methods here report
//! what changed so the graph knows which inverses to touch.
//!
//! [`Graph`]: crate::graph::Graph

use crate::update::{CanonicalUpdate, Linkage, Links};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tether_kernel::{ArenaKey, Handle, Identifier, RelationshipKind, RelationshipMeta};

/// Handle of a relationship stored in the graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationshipKey(Handle);

impl ArenaKey for RelationshipKey {
    fn from_handle(handle: Handle) -> Self {
        Self(handle)
    }

    fn handle(self) -> Handle {
        self.0
    }
}

impl fmt::Display for RelationshipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relationship#{}", self.0)
    }
}

/// Which layer an edit lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Layer {
    Canonical,
    Local,
}

/// Members that entered or left the canonical layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub added: Vec<Identifier>,
    pub removed: Vec<Identifier>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Flags describing where a relationship sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipState {
    pub has_received_data: bool,
    pub is_dirty: bool,
    pub is_stale: bool,
}

#[derive(Debug, Clone)]
enum Members {
    BelongsTo {
        canonical: Option<Identifier>,
        // Outer None: no overlay. Some(None): locally cleared.
        local: Option<Option<Identifier>>,
    },
    HasMany {
        canonical: Vec<Identifier>,
        added: Vec<Identifier>,
        removed: Vec<Identifier>,
    },
}

/// A single named relationship on one entity.
#[derive(Debug, Clone)]
pub struct Relationship {
    meta: Arc<RelationshipMeta>,
    owner: Identifier,
    members: Members,
    has_received_data: bool,
    is_stale: bool,
    links: Option<Links>,
    payload_meta: Option<Value>,
}

impl Relationship {
    pub fn new(owner: Identifier, meta: Arc<RelationshipMeta>) -> Self {
        let members = match meta.kind {
            RelationshipKind::BelongsTo => Members::BelongsTo {
                canonical: None,
                local: None,
            },
            RelationshipKind::HasMany => Members::HasMany {
                canonical: Vec::new(),
                added: Vec::new(),
                removed: Vec::new(),
            },
        };
        Self {
            meta,
            owner,
            members,
            has_received_data: false,
            is_stale: false,
            links: None,
            payload_meta: None,
        }
    }

    pub fn owner(&self) -> Identifier {
        self.owner
    }

    /// Resolved schema descriptor, including the inverse.
    pub fn meta(&self) -> &Arc<RelationshipMeta> {
        &self.meta
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn kind(&self) -> RelationshipKind {
        self.meta.kind
    }

    /// Whether any payload has delivered membership for this relationship.
    pub fn has_received_data(&self) -> bool {
        self.has_received_data
    }

    /// Whether the `related` link changed after membership was received.
    pub fn is_stale(&self) -> bool {
        self.is_stale
    }

    pub fn is_dirty(&self) -> bool {
        match &self.members {
            Members::BelongsTo { local, .. } => local.is_some(),
            Members::HasMany { added, removed, .. } => !added.is_empty() || !removed.is_empty(),
        }
    }

    pub fn state(&self) -> RelationshipState {
        RelationshipState {
            has_received_data: self.has_received_data,
            is_dirty: self.is_dirty(),
            is_stale: self.is_stale,
        }
    }

    pub fn links(&self) -> Option<&Links> {
        self.links.as_ref()
    }

    /// The `meta` object of the latest payload.
    pub fn payload_meta(&self) -> Option<&Value> {
        self.payload_meta.as_ref()
    }

    /// Current to-one value. Always `None` for to-many relationships.
    pub fn current_one(&self) -> Option<Identifier> {
        match &self.members {
            Members::BelongsTo { canonical, local } => local.unwrap_or(*canonical),
            Members::HasMany { .. } => None,
        }
    }

    pub fn canonical_one(&self) -> Option<Identifier> {
        match &self.members {
            Members::BelongsTo { canonical, .. } => *canonical,
            Members::HasMany { .. } => None,
        }
    }

    /// Current membership: canonical members minus local removals, then
    /// local additions in the order they were made.
    pub fn current(&self) -> Vec<Identifier> {
        match &self.members {
            Members::BelongsTo { .. } => self.current_one().into_iter().collect(),
            Members::HasMany {
                canonical,
                added,
                removed,
            } => canonical
                .iter()
                .filter(|member| !removed.contains(member))
                .chain(added.iter())
                .copied()
                .collect(),
        }
    }

    /// Server-confirmed membership.
    pub fn canonical(&self) -> Vec<Identifier> {
        match &self.members {
            Members::BelongsTo { canonical, .. } => canonical.iter().copied().collect(),
            Members::HasMany { canonical, .. } => canonical.clone(),
        }
    }

    pub fn contains(&self, member: Identifier) -> bool {
        self.current().contains(&member)
    }

    /// Every identifier this relationship mentions on either layer.
    pub fn all_members(&self) -> Vec<Identifier> {
        let mut out = Vec::new();
        let mut push = |member: Identifier| {
            if !out.contains(&member) {
                out.push(member);
            }
        };
        match &self.members {
            Members::BelongsTo { canonical, local } => {
                canonical.iter().copied().for_each(&mut push);
                (*local).flatten().into_iter().for_each(&mut push);
            }
            Members::HasMany {
                canonical,
                added,
                removed,
            } => {
                canonical
                    .iter()
                    .chain(added)
                    .chain(removed)
                    .copied()
                    .for_each(&mut push);
            }
        }
        out
    }

    /// Replace canonical membership with the payload's.
    ///
    /// Links/meta-only payloads leave membership and `has_received_data`
    /// untouched. Overlay entries the payload confirms are dropped.
    pub(crate) fn apply_canonical(&mut self, update: CanonicalUpdate) -> MembershipDiff {
        let CanonicalUpdate { data, links, meta } = update;

        if let Some(links) = links {
            if self.has_received_data && related_link(self.links.as_ref()) != links.get("related")
            {
                self.is_stale = true;
            }
            self.links = Some(links);
        }
        if let Some(meta) = meta {
            self.payload_meta = Some(meta);
        }

        let Some(data) = data else {
            return MembershipDiff::default();
        };

        let diff = match (&mut self.members, data) {
            (Members::BelongsTo { canonical, local }, Linkage::One(value)) => {
                let mut diff = MembershipDiff::default();
                if *canonical != value {
                    diff.removed.extend(*canonical);
                    diff.added.extend(value);
                    *canonical = value;
                }
                if *local == Some(value) {
                    *local = None;
                }
                diff
            }
            (
                Members::HasMany {
                    canonical,
                    added,
                    removed,
                },
                Linkage::Many(list),
            ) => {
                let mut incoming = HashSet::new();
                let next: Vec<Identifier> = list
                    .into_iter()
                    .filter(|member| incoming.insert(*member))
                    .collect();
                let previous: HashSet<Identifier> = canonical.iter().copied().collect();

                let diff = MembershipDiff {
                    added: next
                        .iter()
                        .filter(|member| !previous.contains(member))
                        .copied()
                        .collect(),
                    removed: canonical
                        .iter()
                        .filter(|member| !incoming.contains(member))
                        .copied()
                        .collect(),
                };
                *canonical = next;
                added.retain(|member| !incoming.contains(member));
                removed.retain(|member| incoming.contains(member));
                diff
            }
            (_, data) => {
                tracing::warn!(
                    owner_type = %self.meta.owner_type,
                    name = %self.meta.name,
                    to_many = data.is_to_many(),
                    "ignoring canonical payload with mismatched shape"
                );
                return MembershipDiff::default();
            }
        };

        self.has_received_data = true;
        self.is_stale = false;
        diff
    }

    /// Add `member` on one layer. A to-one relationship returns the member
    /// it displaced, if any.
    pub(crate) fn add(&mut self, layer: Layer, member: Identifier) -> Option<Identifier> {
        match (&mut self.members, layer) {
            (Members::BelongsTo { canonical, local }, Layer::Canonical) => {
                self.has_received_data = true;
                let previous = canonical.replace(member);
                if *local == Some(Some(member)) {
                    *local = None;
                }
                previous.filter(|previous| *previous != member)
            }
            (Members::BelongsTo { canonical, local }, Layer::Local) => {
                let previous = local.unwrap_or(*canonical);
                *local = if *canonical == Some(member) {
                    None
                } else {
                    Some(Some(member))
                };
                previous.filter(|previous| *previous != member)
            }
            (Members::HasMany { canonical, added, .. }, Layer::Canonical) => {
                if !canonical.contains(&member) {
                    canonical.push(member);
                }
                added.retain(|m| *m != member);
                None
            }
            (
                Members::HasMany {
                    canonical,
                    added,
                    removed,
                },
                Layer::Local,
            ) => {
                if let Some(pos) = removed.iter().position(|m| *m == member) {
                    removed.remove(pos);
                } else if !canonical.contains(&member) && !added.contains(&member) {
                    added.push(member);
                }
                None
            }
        }
    }

    /// Remove `member` from one layer. Returns whether anything changed.
    pub(crate) fn remove(&mut self, layer: Layer, member: Identifier) -> bool {
        match (&mut self.members, layer) {
            (Members::BelongsTo { canonical, local }, Layer::Canonical) => {
                if *canonical != Some(member) {
                    return false;
                }
                self.has_received_data = true;
                *canonical = None;
                if *local == Some(None) {
                    *local = None;
                }
                true
            }
            (Members::BelongsTo { canonical, local }, Layer::Local) => {
                if local.unwrap_or(*canonical) != Some(member) {
                    return false;
                }
                *local = if canonical.is_none() { None } else { Some(None) };
                true
            }
            (Members::HasMany { canonical, removed, .. }, Layer::Canonical) => {
                let before = canonical.len();
                canonical.retain(|m| *m != member);
                removed.retain(|m| *m != member);
                before != canonical.len()
            }
            (
                Members::HasMany {
                    canonical,
                    added,
                    removed,
                },
                Layer::Local,
            ) => {
                if let Some(pos) = added.iter().position(|m| *m == member) {
                    added.remove(pos);
                    true
                } else if canonical.contains(&member) && !removed.contains(&member) {
                    removed.push(member);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Discard the overlay. Returns the counterparts whose inverse edges
    /// were touched by the discarded edits.
    pub(crate) fn rollback(&mut self) -> Vec<Identifier> {
        match &mut self.members {
            Members::HasMany { added, removed, .. } => {
                let mut out: Vec<Identifier> = added.drain(..).collect();
                out.extend(removed.drain(..));
                out
            }
            Members::BelongsTo { canonical, local } => match local.take() {
                Some(value) => distinct([value, *canonical], None),
                None => Vec::new(),
            },
        }
    }

    /// Undo the overlay entry concerning `other` only.
    ///
    /// For a to-one relationship the whole overlay goes, and the members it
    /// mentioned besides `other` are returned so their edges can be reverted
    /// in turn.
    pub(crate) fn revert_member(&mut self, other: Identifier) -> Vec<Identifier> {
        match &mut self.members {
            Members::HasMany { added, removed, .. } => {
                added.retain(|m| *m != other);
                removed.retain(|m| *m != other);
                Vec::new()
            }
            Members::BelongsTo { canonical, local } => {
                let Some(value) = *local else {
                    return Vec::new();
                };
                if value != Some(other) && *canonical != Some(other) {
                    return Vec::new();
                }
                *local = None;
                distinct([value, *canonical], Some(other))
            }
        }
    }

    /// Forget `member` on every layer. Used when it leaves the graph.
    pub(crate) fn detach(&mut self, member: Identifier) {
        match &mut self.members {
            Members::BelongsTo { canonical, local } => {
                if *canonical == Some(member) {
                    *canonical = None;
                }
                if *local == Some(Some(member)) || (*local == Some(None) && canonical.is_none()) {
                    *local = None;
                }
            }
            Members::HasMany {
                canonical,
                added,
                removed,
            } => {
                canonical.retain(|m| *m != member);
                added.retain(|m| *m != member);
                removed.retain(|m| *m != member);
            }
        }
    }
}

fn related_link(links: Option<&Links>) -> Option<&Value> {
    links.and_then(|links| links.get("related"))
}

fn distinct(values: [Option<Identifier>; 2], except: Option<Identifier>) -> Vec<Identifier> {
    let mut out = Vec::new();
    for value in values.into_iter().flatten() {
        if Some(value) != except && !out.contains(&value) {
            out.push(value);
        }
    }
    out
}
