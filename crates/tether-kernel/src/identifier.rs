//! Stable identifiers and the identity map that issues them.
//!
//! An [`Identifier`] stands for "this logical entity" whether or not the
//! server id is known yet. Every identifier owns a client-generated `lid`;
//! the server id is filled in place once it arrives, so graph edges that
//! already point at the handle never need rewriting.
//!
//! Handles are compared by equality of the handle itself. Two different
//! handles never describe the same (type, id).

use crate::arena::{Arena, ArenaKey, Handle};
use crate::error::TetherError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub const DEFAULT_LID_PREFIX: &str = "@lid";

/// Opaque, store-unique handle for one logical entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Identifier(Handle);

impl ArenaKey for Identifier {
    fn from_handle(handle: Handle) -> Self {
        Self(handle)
    }

    fn handle(self) -> Handle {
        self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "identifier#{}", self.0)
    }
}

/// What an identifier currently knows about its entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifierRecord {
    type_name: String,
    id: Option<String>,
    lid: String,
}

impl IdentifierRecord {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Server id, once known.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn lid(&self) -> &str {
        &self.lid
    }
}

/// Identity map: one [`Identifier`] per (type, id), plus a lid index for
/// records the server has not confirmed yet.
#[derive(Debug)]
pub struct IdentifierCache {
    lid_prefix: String,
    records: Arena<Identifier, IdentifierRecord>,
    by_lid: HashMap<String, Identifier>,
    by_id: HashMap<String, HashMap<String, Identifier>>,
}

impl Default for IdentifierCache {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::with_lid_prefix(DEFAULT_LID_PREFIX)
    }

    pub fn with_lid_prefix(lid_prefix: impl Into<String>) -> Self {
        Self {
            lid_prefix: lid_prefix.into(),
            records: Arena::new(),
            by_lid: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Number of live identifiers.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, identifier: Identifier) -> bool {
        self.records.contains(identifier)
    }

    /// Lookup by (type, server id) without allocating.
    pub fn peek(&self, type_name: &str, id: &str) -> Option<Identifier> {
        self.by_id
            .get(type_name)
            .and_then(|ids| ids.get(id))
            .copied()
    }

    /// Lookup by local id without allocating.
    pub fn peek_lid(&self, lid: &str) -> Option<Identifier> {
        self.by_lid.get(lid).copied()
    }

    /// Return `(type, id?, lid)` for a live identifier.
    pub fn resolve(&self, identifier: Identifier) -> Result<&IdentifierRecord, TetherError> {
        self.records
            .get(identifier)
            .ok_or(TetherError::StaleIdentifier(identifier))
    }

    /// Return the identifier for `(type, id)` or `lid`, allocating one if
    /// neither is known.
    ///
    /// When the lid is known but has no id yet, `id` is assigned in place.
    /// When `id` and `lid` point at two different identifiers the call fails
    /// with [`TetherError::IdentityConflict`].
    pub fn get_or_create(
        &mut self,
        type_name: &str,
        id: Option<&str>,
        lid: Option<&str>,
    ) -> Result<Identifier, TetherError> {
        let by_id = id.and_then(|id| self.peek(type_name, id));
        let by_lid = lid.and_then(|lid| self.peek_lid(lid));

        match (by_id, by_lid) {
            (Some(known), Some(other)) if known != other => {
                Err(self.conflict(type_name, id.unwrap_or_default(), known, other))
            }
            (Some(known), _) => Ok(known),
            (None, Some(known)) => {
                let record = self.resolve(known)?;
                if record.type_name != type_name {
                    return Err(TetherError::TypeMismatch {
                        lid: record.lid.clone(),
                        expected: type_name.to_string(),
                        found: record.type_name.clone(),
                    });
                }
                if let Some(id) = id {
                    self.merge_identifier(known, id)?;
                }
                Ok(known)
            }
            (None, None) => Ok(self.allocate(type_name, id, lid)),
        }
    }

    /// Allocate an identifier for a record created on the client.
    pub fn create_for_new_record(&mut self, type_name: &str) -> Identifier {
        self.allocate(type_name, None, None)
    }

    /// Record the server id of a client-created entity in place.
    ///
    /// Re-merging the id the identifier already carries is a no-op.
    pub fn merge_identifier(
        &mut self,
        identifier: Identifier,
        new_id: &str,
    ) -> Result<Identifier, TetherError> {
        let record = self.resolve(identifier)?;
        let type_name = record.type_name.clone();

        if let Some(existing) = self.peek(&type_name, new_id) {
            if existing == identifier {
                return Ok(identifier);
            }
            return Err(self.conflict(&type_name, new_id, existing, identifier));
        }
        if let Some(current) = &record.id {
            return Err(TetherError::IdReassigned {
                lid: record.lid.clone(),
                current: current.clone(),
                incoming: new_id.to_string(),
            });
        }

        let record = self
            .records
            .get_mut(identifier)
            .ok_or(TetherError::StaleIdentifier(identifier))?;
        record.id = Some(new_id.to_string());
        tracing::debug!(lid = %record.lid, type_name = %type_name, id = new_id, "merged server id");

        self.by_id
            .entry(type_name)
            .or_default()
            .insert(new_id.to_string(), identifier);
        Ok(identifier)
    }

    /// Release an identifier. Every copy of the handle becomes stale.
    pub fn forget(&mut self, identifier: Identifier) -> Result<IdentifierRecord, TetherError> {
        let record = self
            .records
            .remove(identifier)
            .ok_or(TetherError::StaleIdentifier(identifier))?;

        self.by_lid.remove(&record.lid);
        if let Some(id) = &record.id
            && let Some(ids) = self.by_id.get_mut(&record.type_name)
        {
            ids.remove(id);
            if ids.is_empty() {
                self.by_id.remove(&record.type_name);
            }
        }
        tracing::trace!(lid = %record.lid, "forgot identifier");
        Ok(record)
    }

    fn allocate(&mut self, type_name: &str, id: Option<&str>, lid: Option<&str>) -> Identifier {
        let lid = match lid {
            Some(lid) => lid.to_string(),
            None => format!("{}:{}-{}", self.lid_prefix, type_name, Uuid::new_v4()),
        };
        let identifier = self.records.insert(IdentifierRecord {
            type_name: type_name.to_string(),
            id: id.map(ToOwned::to_owned),
            lid: lid.clone(),
        });

        self.by_lid.insert(lid.clone(), identifier);
        if let Some(id) = id {
            self.by_id
                .entry(type_name.to_string())
                .or_default()
                .insert(id.to_string(), identifier);
        }
        tracing::trace!(lid = %lid, type_name, id = ?id, "allocated identifier");
        identifier
    }

    fn conflict(
        &self,
        type_name: &str,
        id: &str,
        existing: Identifier,
        incoming: Identifier,
    ) -> TetherError {
        let lid_of = |identifier| {
            self.records
                .get(identifier)
                .map(|record| record.lid.clone())
                .unwrap_or_else(|| identifier.to_string())
        };
        TetherError::IdentityConflict {
            type_name: type_name.to_string(),
            id: id.to_string(),
            existing_lid: lid_of(existing),
            incoming_lid: lid_of(incoming),
        }
    }
}
