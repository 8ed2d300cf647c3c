//! Store facade: identifiers, record data and the relationship graph behind
//! one set of operations.
//!
//! All canonical relationship changes go through [`Store::push`] and land on
//! the next [`Store::flush`]. Local edits apply immediately. Responses are
//! applied in the order they are pushed; a late response overwrites earlier
//! canonical state without any staleness check.

use crate::config::{ConfigError, StoreConfig};
use crate::payload::{
    Attributes, NormalizedResource, RelationshipValue, ResourceLinkage, ResourceReference,
};
use crate::record_data::{ChangedAttributes, DirtyType, RecordData};
use crate::snapshot::Snapshot;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tether_graph::{
    CanonicalUpdate, FlushReport, Graph, Linkage, Links, Relationship, RelationshipState,
};
use tether_kernel::{Identifier, IdentifierCache, IdentifierRecord, RelationshipKind, TetherError};

#[derive(Debug)]
pub struct Store {
    config: StoreConfig,
    ids: IdentifierCache,
    graph: Graph,
    records: HashMap<Identifier, RecordData>,
}

impl Store {
    pub fn new(config: StoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ids: IdentifierCache::with_lid_prefix(config.lid_prefix.clone()),
            graph: Graph::new(Arc::new(config.schema())),
            records: HashMap::new(),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn identifiers(&self) -> &IdentifierCache {
        &self.ids
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    // ── Identity ──

    /// The identifier for `(type, id)`, allocated on first use.
    pub fn identifier(&mut self, type_name: &str, id: &str) -> Result<Identifier, TetherError> {
        let identifier = self.ids.get_or_create(type_name, Some(id), None)?;
        self.ensure_record(identifier)?;
        Ok(identifier)
    }

    pub fn peek(&self, type_name: &str, id: &str) -> Option<Identifier> {
        self.ids.peek(type_name, id)
    }

    pub fn resolve(&self, identifier: Identifier) -> Result<&IdentifierRecord, TetherError> {
        self.ids.resolve(identifier)
    }

    /// Reference suitable for an outgoing payload: the server id when
    /// known, the lid otherwise.
    pub fn reference(&self, identifier: Identifier) -> Result<ResourceReference, TetherError> {
        let entry = self.ids.resolve(identifier)?;
        Ok(ResourceReference {
            type_name: entry.type_name().to_string(),
            id: entry.id().map(ToOwned::to_owned),
            lid: entry.id().is_none().then(|| entry.lid().to_string()),
        })
    }

    // ── Ingestion ──

    /// Merge one normalized resource and queue its relationships.
    ///
    /// Relationship names the schema does not declare are skipped. References
    /// to deleted records are dropped. A relationship whose shape contradicts
    /// the declared kind fails the push before any referenced identifier is
    /// created or any attribute is merged. Pushing an id for a record created
    /// on the client confirms it.
    pub fn push(&mut self, resource: NormalizedResource) -> Result<Identifier, TetherError> {
        let NormalizedResource {
            type_name,
            id,
            lid,
            attributes,
            relationships,
        } = resource;

        let identifier = self
            .ids
            .get_or_create(&type_name, id.as_deref(), lid.as_deref())?;
        self.ensure_record(identifier)?;
        self.record(identifier)?.ensure_live()?;
        self.confirm(identifier)?;

        let updates = self.resolve_relationships(&type_name, relationships)?;
        self.record_mut(identifier)?.push_data(&attributes)?;
        self.queue(identifier, updates)?;
        Ok(identifier)
    }

    pub fn push_many(
        &mut self,
        resources: impl IntoIterator<Item = NormalizedResource>,
    ) -> Result<Vec<Identifier>, TetherError> {
        resources
            .into_iter()
            .map(|resource| self.push(resource))
            .collect()
    }

    /// Apply every queued relationship update.
    pub fn flush(&mut self) -> FlushReport {
        self.graph.flush()
    }

    pub fn has_pending(&self) -> bool {
        self.graph.has_pending()
    }

    /// Allocate a record on the client. It stays new until the server names
    /// its id, through a save or a push.
    pub fn create_record(
        &mut self,
        type_name: &str,
        attributes: Attributes,
    ) -> Result<Identifier, TetherError> {
        let identifier = self.ids.create_for_new_record(type_name);
        let lid = self.ids.resolve(identifier)?.lid().to_string();
        self.records
            .insert(identifier, RecordData::created(lid, attributes));
        Ok(identifier)
    }

    // ── Attributes ──

    pub fn attribute(
        &self,
        identifier: Identifier,
        key: &str,
    ) -> Result<Option<&Value>, TetherError> {
        self.record(identifier)?.attribute(key)
    }

    pub fn attributes(&self, identifier: Identifier) -> Result<Attributes, TetherError> {
        self.record(identifier)?.attributes()
    }

    pub fn set_attribute(
        &mut self,
        identifier: Identifier,
        key: &str,
        value: Value,
    ) -> Result<(), TetherError> {
        self.record_mut(identifier)?.set_attribute(key, value)
    }

    pub fn changed_attributes(
        &self,
        identifier: Identifier,
    ) -> Result<ChangedAttributes, TetherError> {
        self.record(identifier)?.changed_attributes()
    }

    pub fn rollback_attributes(
        &mut self,
        identifier: Identifier,
    ) -> Result<Vec<String>, TetherError> {
        self.record_mut(identifier)?.rollback_attributes()
    }

    pub fn is_new(&self, identifier: Identifier) -> Result<bool, TetherError> {
        self.record(identifier)?.is_new()
    }

    pub fn dirty_type(&self, identifier: Identifier) -> Result<DirtyType, TetherError> {
        let record = self.record(identifier)?;
        record.ensure_live()?;
        Ok(record.dirty_type())
    }

    /// Dirty attributes or any relationship with local edits.
    pub fn is_dirty(&self, identifier: Identifier) -> Result<bool, TetherError> {
        Ok(self.record(identifier)?.is_dirty()? || self.graph.is_dirty(identifier))
    }

    // ── Relationships ──

    pub fn belongs_to(
        &self,
        identifier: Identifier,
        name: &str,
    ) -> Result<Option<Identifier>, TetherError> {
        Ok(self
            .read(identifier, name, RelationshipKind::BelongsTo)?
            .and_then(Relationship::current_one))
    }

    pub fn has_many(
        &self,
        identifier: Identifier,
        name: &str,
    ) -> Result<Vec<Identifier>, TetherError> {
        Ok(self
            .read(identifier, name, RelationshipKind::HasMany)?
            .map(Relationship::current)
            .unwrap_or_default())
    }

    pub fn relationship_state(
        &self,
        identifier: Identifier,
        name: &str,
    ) -> Result<RelationshipState, TetherError> {
        self.ensure_live(identifier)?;
        Ok(self
            .graph
            .peek(&self.ids, identifier, name)?
            .map(Relationship::state)
            .unwrap_or(RelationshipState {
                has_received_data: false,
                is_dirty: false,
                is_stale: false,
            }))
    }

    pub fn relationship_links(
        &self,
        identifier: Identifier,
        name: &str,
    ) -> Result<Option<&Links>, TetherError> {
        self.ensure_live(identifier)?;
        Ok(self
            .graph
            .peek(&self.ids, identifier, name)?
            .and_then(Relationship::links))
    }

    pub fn add_to_has_many(
        &mut self,
        owner: Identifier,
        name: &str,
        member: Identifier,
    ) -> Result<(), TetherError> {
        self.ensure_live(owner)?;
        self.ensure_live(member)?;
        self.graph.add_to_has_many(&self.ids, owner, name, member)
    }

    pub fn remove_from_has_many(
        &mut self,
        owner: Identifier,
        name: &str,
        member: Identifier,
    ) -> Result<(), TetherError> {
        self.ensure_live(owner)?;
        self.ensure_live(member)?;
        self.graph.remove_from_has_many(&self.ids, owner, name, member)
    }

    pub fn set_belongs_to(
        &mut self,
        owner: Identifier,
        name: &str,
        value: Option<Identifier>,
    ) -> Result<(), TetherError> {
        self.ensure_live(owner)?;
        if let Some(member) = value {
            self.ensure_live(member)?;
        }
        self.graph.set_belongs_to(&self.ids, owner, name, value)
    }

    pub fn rollback_relationship(
        &mut self,
        owner: Identifier,
        name: &str,
    ) -> Result<(), TetherError> {
        self.ensure_live(owner)?;
        self.graph.rollback(&self.ids, owner, name)
    }

    /// Roll back attributes and every relationship of `identifier`.
    /// Returns the attribute keys that were rolled back.
    pub fn rollback_record(&mut self, identifier: Identifier) -> Result<Vec<String>, TetherError> {
        let keys = self.record_mut(identifier)?.rollback_attributes()?;
        self.graph.rollback_all(&self.ids, identifier)?;
        Ok(keys)
    }

    // ── Save lifecycle ──

    pub fn will_commit(&mut self, identifier: Identifier) -> Result<(), TetherError> {
        self.record_mut(identifier)?.will_commit()
    }

    /// The save for `identifier` succeeded.
    ///
    /// A response id is merged into the identifier in place, so every edge
    /// that already mentions it stays valid. A record marked deleted is
    /// deleted now.
    pub fn did_commit(
        &mut self,
        identifier: Identifier,
        response: Option<NormalizedResource>,
    ) -> Result<(), TetherError> {
        if self.dirty_type(identifier)? == DirtyType::Deleted {
            return self.delete_record(identifier);
        }
        let Some(response) = response else {
            return self.record_mut(identifier)?.did_commit(None);
        };

        let owner_type = self.ids.resolve(identifier)?.type_name().to_string();
        if response.type_name != owner_type {
            tracing::warn!(
                %identifier,
                expected = %owner_type,
                received = %response.type_name,
                "commit response type differs from record type"
            );
        }
        if let Some(id) = response.id.as_deref() {
            self.ids.merge_identifier(identifier, id)?;
        }

        let updates = self.resolve_relationships(&owner_type, response.relationships)?;
        self.record_mut(identifier)?
            .did_commit(Some(&response.attributes))?;
        self.queue(identifier, updates)
    }

    pub fn commit_was_rejected(&mut self, identifier: Identifier) -> Result<(), TetherError> {
        self.record_mut(identifier)?.commit_was_rejected()
    }

    /// Flag `identifier` for deletion on its next save.
    pub fn mark_deleted(&mut self, identifier: Identifier) -> Result<(), TetherError> {
        self.record_mut(identifier)?.mark_deleted()
    }

    // ── Removal ──

    /// Detach the record from the graph and destroy its data.
    ///
    /// The identifier stays reserved: a later push for the same entity
    /// fails with [`TetherError::Destroyed`].
    pub fn delete_record(&mut self, identifier: Identifier) -> Result<(), TetherError> {
        self.ensure_live(identifier)?;
        let freed = self.graph.remove_identifier(identifier);
        self.record_mut(identifier)?.destroy();
        tracing::debug!(%identifier, freed, "deleted record");
        Ok(())
    }

    /// Detach the record and release its identifier. Every copy of the
    /// identifier becomes stale.
    pub fn unload_record(&mut self, identifier: Identifier) -> Result<(), TetherError> {
        self.ids.resolve(identifier)?;
        let freed = self.graph.remove_identifier(identifier);
        self.records.remove(&identifier);
        let entry = self.ids.forget(identifier)?;
        tracing::debug!(lid = %entry.lid(), freed, "unloaded record");
        Ok(())
    }

    // ── Read view ──

    pub fn snapshot(&self, identifier: Identifier) -> Result<Snapshot, TetherError> {
        let attributes = self.record(identifier)?.attributes()?;
        let entry = self.ids.resolve(identifier)?;

        let mut relationships = BTreeMap::new();
        for meta in self.graph.schema().relationships_of(entry.type_name()) {
            let relationship = self.graph.peek(&self.ids, identifier, &meta.name)?;
            let linkage = if meta.is_to_many() {
                let members = relationship.map(Relationship::current).unwrap_or_default();
                ResourceLinkage::Many(
                    members
                        .into_iter()
                        .map(|member| self.reference(member))
                        .collect::<Result<_, _>>()?,
                )
            } else {
                ResourceLinkage::One(
                    relationship
                        .and_then(Relationship::current_one)
                        .map(|member| self.reference(member))
                        .transpose()?,
                )
            };
            relationships.insert(meta.name.clone(), linkage);
        }

        Ok(Snapshot {
            type_name: entry.type_name().to_string(),
            id: entry.id().map(ToOwned::to_owned),
            lid: entry.lid().to_string(),
            attributes,
            relationships,
        })
    }

    // ── Internals ──

    fn record(&self, identifier: Identifier) -> Result<&RecordData, TetherError> {
        self.ids.resolve(identifier)?;
        self.records
            .get(&identifier)
            .ok_or(TetherError::StaleIdentifier(identifier))
    }

    fn record_mut(&mut self, identifier: Identifier) -> Result<&mut RecordData, TetherError> {
        self.ids.resolve(identifier)?;
        self.records
            .get_mut(&identifier)
            .ok_or(TetherError::StaleIdentifier(identifier))
    }

    fn ensure_record(&mut self, identifier: Identifier) -> Result<(), TetherError> {
        if !self.records.contains_key(&identifier) {
            let lid = self.ids.resolve(identifier)?.lid().to_string();
            self.records.insert(identifier, RecordData::new(lid));
        }
        Ok(())
    }

    fn ensure_live(&self, identifier: Identifier) -> Result<(), TetherError> {
        self.record(identifier)?.ensure_live()
    }

    fn read(
        &self,
        identifier: Identifier,
        name: &str,
        expected: RelationshipKind,
    ) -> Result<Option<&Relationship>, TetherError> {
        self.ensure_live(identifier)?;
        let type_name = self.ids.resolve(identifier)?.type_name();
        let meta = self.graph.schema().relationship(type_name, name)?;
        if meta.kind != expected {
            return Err(TetherError::ShapeMismatch {
                type_name: type_name.to_string(),
                name: name.to_string(),
                expected: meta.kind,
            });
        }
        self.graph.peek(&self.ids, identifier, name)
    }

    // Every shape is checked before the first reference creates an
    // identifier, so a rejected payload leaves the cache untouched.
    fn resolve_relationships(
        &mut self,
        type_name: &str,
        relationships: BTreeMap<String, RelationshipValue>,
    ) -> Result<Vec<(String, CanonicalUpdate)>, TetherError> {
        let mut declared = Vec::with_capacity(relationships.len());
        for (name, value) in relationships {
            let kind = match self.graph.schema().relationship(type_name, &name) {
                Ok(meta) => meta.kind,
                Err(_) => {
                    tracing::warn!(
                        type_name,
                        name = %name,
                        "skipping undeclared relationship in payload"
                    );
                    continue;
                }
            };
            let (linkage, links, meta) = value.into_parts();
            if let Some(linkage) = &linkage
                && linkage.is_to_many() != kind.is_to_many()
            {
                return Err(TetherError::ShapeMismatch {
                    type_name: type_name.to_string(),
                    name,
                    expected: kind,
                });
            }
            let update = CanonicalUpdate {
                data: None,
                links,
                meta,
            };
            declared.push((name, linkage, update));
        }

        let mut updates = Vec::with_capacity(declared.len());
        for (name, linkage, mut update) in declared {
            update.data = match linkage {
                Some(linkage) => Some(self.resolve_linkage(linkage)?),
                None => None,
            };
            updates.push((name, update));
        }
        Ok(updates)
    }

    fn resolve_linkage(&mut self, linkage: ResourceLinkage) -> Result<Linkage, TetherError> {
        Ok(match linkage {
            ResourceLinkage::One(None) => Linkage::One(None),
            ResourceLinkage::One(Some(reference)) => Linkage::One(self.target(&reference)?),
            ResourceLinkage::Many(references) => {
                let mut members = Vec::with_capacity(references.len());
                for reference in &references {
                    if let Some(member) = self.target(reference)? {
                        members.push(member);
                    }
                }
                Linkage::Many(members)
            }
        })
    }

    fn target(&mut self, reference: &ResourceReference) -> Result<Option<Identifier>, TetherError> {
        if reference.id.is_none() && reference.lid.is_none() {
            tracing::warn!(
                type_name = %reference.type_name,
                "skipping reference without id or lid"
            );
            return Ok(None);
        }
        let identifier = self.ids.get_or_create(
            &reference.type_name,
            reference.id.as_deref(),
            reference.lid.as_deref(),
        )?;
        self.ensure_record(identifier)?;
        if self.record(identifier)?.is_destroyed() {
            tracing::warn!(
                %identifier,
                type_name = %reference.type_name,
                "skipping reference to deleted record"
            );
            return Ok(None);
        }
        self.confirm(identifier)?;
        Ok(Some(identifier))
    }

    // A client-created record stops being new once the server names its id.
    fn confirm(&mut self, identifier: Identifier) -> Result<(), TetherError> {
        if self.ids.resolve(identifier)?.id().is_some() {
            self.record_mut(identifier)?.confirm();
        }
        Ok(())
    }

    fn queue(
        &mut self,
        identifier: Identifier,
        updates: Vec<(String, CanonicalUpdate)>,
    ) -> Result<(), TetherError> {
        for (name, update) in updates {
            self.graph.push(&self.ids, identifier, &name, update)?;
        }
        Ok(())
    }
}
