//! The relationship graph: every relationship of one store, plus the queue
//! of canonical updates waiting for the next flush.
//!
//! Canonical state only changes inside [`Graph::flush`]. Local edits apply
//! immediately and mirror their inverse immediately. Both paths share the
//! same mirroring helpers, parameterized by [`Layer`].
//!
//! Late pushes are applied unconditionally: two responses touching the
//! same relationship land in arrival order and the last one wins. There is
//! no staleness or version check.

use crate::relationship::{Layer, Relationship, RelationshipKey};
use crate::relationships::Relationships;
use crate::update::{CanonicalUpdate, Linkage};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tether_kernel::{
    Arena, ArenaKey, Identifier, IdentifierCache, RelationshipKind, RelationshipMeta, Schema,
    TetherError,
};

#[derive(Debug, Clone)]
struct PendingPush {
    identifier: Identifier,
    meta: Arc<RelationshipMeta>,
    update: CanonicalUpdate,
}

/// What one flush applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub applied: usize,
    pub to_many: usize,
    pub to_one: usize,
}

/// Store-scoped owner of all relationship state.
#[derive(Debug)]
pub struct Graph {
    schema: Arc<Schema>,
    relationships: Arena<RelationshipKey, Relationship>,
    containers: HashMap<Identifier, Relationships>,
    implicit: HashMap<Identifier, Relationships>,
    queue: Vec<PendingPush>,
    flush_scheduled: bool,
}

impl Graph {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            relationships: Arena::new(),
            containers: HashMap::new(),
            implicit: HashMap::new(),
            queue: Vec::new(),
            flush_scheduled: false,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Container of declared relationships for `identifier`, created on
    /// first lookup.
    pub fn get(
        &mut self,
        ids: &IdentifierCache,
        identifier: Identifier,
    ) -> Result<&Relationships, TetherError> {
        ids.resolve(identifier)?;
        Ok(self
            .containers
            .entry(identifier)
            .or_insert_with(|| Relationships::new(identifier)))
    }

    /// Implicit registry for `identifier`, created on first lookup.
    pub fn get_implicit(
        &mut self,
        ids: &IdentifierCache,
        identifier: Identifier,
    ) -> Result<&Relationships, TetherError> {
        ids.resolve(identifier)?;
        Ok(self
            .implicit
            .entry(identifier)
            .or_insert_with(|| Relationships::new(identifier)))
    }

    /// Handle of `identifier.name`, materializing the relationship if this
    /// is the first access.
    pub fn relationship_key(
        &mut self,
        ids: &IdentifierCache,
        identifier: Identifier,
        name: &str,
    ) -> Result<RelationshipKey, TetherError> {
        let meta = self.meta_for(ids, identifier, name)?;
        Ok(self.materialize(identifier, meta))
    }

    pub fn relationship(&self, key: RelationshipKey) -> Result<&Relationship, TetherError> {
        self.relationships
            .get(key)
            .ok_or(TetherError::StaleRelationship(key.handle()))
    }

    /// Read `identifier.name` without materializing it. `Ok(None)` means the
    /// relationship was never touched and is empty.
    pub fn peek(
        &self,
        ids: &IdentifierCache,
        identifier: Identifier,
        name: &str,
    ) -> Result<Option<&Relationship>, TetherError> {
        let meta = self.meta_for(ids, identifier, name)?;
        Ok(self
            .existing_key(identifier, &meta)
            .and_then(|key| self.relationships.get(key)))
    }

    /// Whether any declared relationship of `identifier` carries local edits.
    pub fn is_dirty(&self, identifier: Identifier) -> bool {
        self.containers.get(&identifier).is_some_and(|container| {
            container.keys().any(|key| {
                self.relationships
                    .get(key)
                    .is_some_and(Relationship::is_dirty)
            })
        })
    }

    /// Number of live relationships across all identifiers.
    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    // ── Canonical path ──

    /// Queue a canonical update for `identifier.name`.
    ///
    /// Nothing is applied until [`Graph::flush`]. Returns `true` when this
    /// push opened a new batch, i.e. the host must schedule a flush.
    pub fn push(
        &mut self,
        ids: &IdentifierCache,
        identifier: Identifier,
        name: &str,
        update: CanonicalUpdate,
    ) -> Result<bool, TetherError> {
        let type_name = ids.resolve(identifier)?.type_name();
        let meta = Arc::clone(self.schema.relationship(type_name, name)?);

        if let Some(data) = &update.data
            && data.is_to_many() != meta.is_to_many()
        {
            return Err(TetherError::ShapeMismatch {
                type_name: meta.owner_type.clone(),
                name: meta.name.clone(),
                expected: meta.kind,
            });
        }

        self.queue.push(PendingPush {
            identifier,
            meta,
            update,
        });
        let opened = !self.flush_scheduled;
        self.flush_scheduled = true;
        Ok(opened)
    }

    /// Number of queued canonical updates.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Apply every queued update.
    ///
    /// To-many updates run before to-one updates; submission order is kept
    /// within each class. Each update is mirrored onto its inverse directly,
    /// never re-queued.
    pub fn flush(&mut self) -> FlushReport {
        self.flush_scheduled = false;
        if self.queue.is_empty() {
            return FlushReport::default();
        }

        let mut batch = std::mem::take(&mut self.queue);
        batch.sort_by_key(|pending| !pending.meta.is_to_many());

        let mut report = FlushReport::default();
        for pending in batch {
            if pending.meta.is_to_many() {
                report.to_many += 1;
            } else {
                report.to_one += 1;
            }
            let key = self.materialize(pending.identifier, pending.meta);
            self.apply_canonical(key, pending.update);
            report.applied += 1;
        }

        tracing::debug!(
            applied = report.applied,
            to_many = report.to_many,
            to_one = report.to_one,
            "flushed relationship batch"
        );
        report
    }

    fn apply_canonical(&mut self, key: RelationshipKey, update: CanonicalUpdate) {
        if let Some(Linkage::One(value)) = &update.data {
            self.settle_to_one(key, *value);
        }
        let Some(rel) = self.relationships.get_mut(key) else {
            return;
        };
        let diff = rel.apply_canonical(update);
        if diff.is_empty() {
            return;
        }

        let owner = rel.owner();
        let meta = Arc::clone(rel.meta());
        for member in diff.removed {
            self.mirror_remove(Layer::Canonical, &meta, owner, member);
        }
        for member in diff.added {
            self.mirror_add(Layer::Canonical, &meta, owner, member);
        }
    }

    // ── Local path ──

    /// Optimistically add `member` to `owner.name` (to-many).
    pub fn add_to_has_many(
        &mut self,
        ids: &IdentifierCache,
        owner: Identifier,
        name: &str,
        member: Identifier,
    ) -> Result<(), TetherError> {
        ids.resolve(member)?;
        let key = self.local_key(ids, owner, name, RelationshipKind::HasMany)?;
        self.local_add(key, member)
    }

    /// Optimistically remove `member` from `owner.name` (to-many).
    pub fn remove_from_has_many(
        &mut self,
        ids: &IdentifierCache,
        owner: Identifier,
        name: &str,
        member: Identifier,
    ) -> Result<(), TetherError> {
        ids.resolve(member)?;
        let key = self.local_key(ids, owner, name, RelationshipKind::HasMany)?;
        self.local_remove(key, member)
    }

    /// Optimistically point `owner.name` at `value` (to-one).
    pub fn set_belongs_to(
        &mut self,
        ids: &IdentifierCache,
        owner: Identifier,
        name: &str,
        value: Option<Identifier>,
    ) -> Result<(), TetherError> {
        let key = self.local_key(ids, owner, name, RelationshipKind::BelongsTo)?;
        match value {
            Some(member) => {
                ids.resolve(member)?;
                self.local_add(key, member)
            }
            None => match self.relationship(key)?.current_one() {
                Some(current) => self.local_remove(key, current),
                None => Ok(()),
            },
        }
    }

    fn local_key(
        &mut self,
        ids: &IdentifierCache,
        owner: Identifier,
        name: &str,
        expected: RelationshipKind,
    ) -> Result<RelationshipKey, TetherError> {
        let meta = self.meta_for(ids, owner, name)?;
        if meta.kind != expected {
            return Err(TetherError::ShapeMismatch {
                type_name: meta.owner_type.clone(),
                name: meta.name.clone(),
                expected: meta.kind,
            });
        }
        Ok(self.materialize(owner, meta))
    }

    fn local_add(&mut self, key: RelationshipKey, member: Identifier) -> Result<(), TetherError> {
        let rel = self
            .relationships
            .get_mut(key)
            .ok_or(TetherError::StaleRelationship(key.handle()))?;
        let displaced = rel.add(Layer::Local, member);
        let owner = rel.owner();
        let meta = Arc::clone(rel.meta());

        if let Some(previous) = displaced {
            self.mirror_remove(Layer::Local, &meta, owner, previous);
        }
        self.mirror_add(Layer::Local, &meta, owner, member);
        Ok(())
    }

    fn local_remove(
        &mut self,
        key: RelationshipKey,
        member: Identifier,
    ) -> Result<(), TetherError> {
        let rel = self
            .relationships
            .get_mut(key)
            .ok_or(TetherError::StaleRelationship(key.handle()))?;
        if !rel.remove(Layer::Local, member) {
            return Ok(());
        }
        let owner = rel.owner();
        let meta = Arc::clone(rel.meta());
        self.mirror_remove(Layer::Local, &meta, owner, member);
        Ok(())
    }

    /// Discard local edits on `owner.name` and on every inverse edge they
    /// touched.
    pub fn rollback(
        &mut self,
        ids: &IdentifierCache,
        owner: Identifier,
        name: &str,
    ) -> Result<(), TetherError> {
        let key = self.relationship_key(ids, owner, name)?;
        self.rollback_key(key)
    }

    /// Roll back every materialized declared relationship of `owner`.
    pub fn rollback_all(
        &mut self,
        ids: &IdentifierCache,
        owner: Identifier,
    ) -> Result<(), TetherError> {
        ids.resolve(owner)?;
        let keys: Vec<RelationshipKey> = self
            .containers
            .get(&owner)
            .map(|container| container.keys().collect())
            .unwrap_or_default();
        for key in keys {
            self.rollback_key(key)?;
        }
        Ok(())
    }

    fn rollback_key(&mut self, key: RelationshipKey) -> Result<(), TetherError> {
        if !self.relationships.contains(key) {
            return Err(TetherError::StaleRelationship(key.handle()));
        }
        self.revert_overlay(key);
        Ok(())
    }

    /// Server state wins over a local to-one edit: when the canonical value
    /// of a dirty to-one is about to become `next`, its edit is rolled back
    /// first so the inverse side drops the mirrored entries.
    fn settle_to_one(&mut self, key: RelationshipKey, next: Option<Identifier>) {
        let Some(rel) = self.relationships.get(key) else {
            return;
        };
        if rel.meta().is_to_many() || !rel.is_dirty() || rel.canonical_one() == next {
            return;
        }
        tracing::debug!(
            owner = %rel.owner(),
            name = rel.name(),
            "server update replaces local to-one edit"
        );
        self.revert_overlay(key);
    }

    fn revert_overlay(&mut self, key: RelationshipKey) {
        let schema = Arc::clone(&self.schema);
        let Some(rel) = self.relationships.get_mut(key) else {
            return;
        };
        let touched = rel.rollback();
        let owner = rel.owner();
        let meta = Arc::clone(rel.meta());

        let Some(inverse) = schema.inverse_of(&meta) else {
            return;
        };

        // (holder, holder's relationship, member whose edge to revert)
        let mut work: VecDeque<(Identifier, Arc<RelationshipMeta>, Identifier)> = touched
            .into_iter()
            .map(|member| (member, Arc::clone(inverse), owner))
            .collect();
        let mut seen = HashSet::new();

        while let Some((holder, holder_meta, other)) = work.pop_front() {
            if !seen.insert((holder, holder_meta.name.clone(), other)) {
                continue;
            }
            let Some(key) = self.existing_key(holder, &holder_meta) else {
                continue;
            };
            let Some(rel) = self.relationships.get_mut(key) else {
                continue;
            };
            let cascade = rel.revert_member(other);
            if cascade.is_empty() {
                continue;
            }
            let Some(back) = schema.inverse_of(&holder_meta) else {
                continue;
            };
            for next in cascade {
                work.push_back((next, Arc::clone(back), holder));
            }
        }
    }

    // ── Removal ──

    /// Detach `identifier` from the graph.
    ///
    /// Every declared and implicit relationship it owns is freed and every
    /// inverse that mentions it forgets it on both layers. Queued updates
    /// for it are dropped and queued references to it are stripped.
    /// Returns the number of relationships freed.
    pub fn remove_identifier(&mut self, identifier: Identifier) -> usize {
        let schema = Arc::clone(&self.schema);
        let mut keys: Vec<RelationshipKey> = Vec::new();
        if let Some(container) = self.containers.remove(&identifier) {
            keys.extend(container.keys());
        }
        if let Some(container) = self.implicit.remove(&identifier) {
            keys.extend(container.keys());
        }

        let mut freed = 0;
        for key in keys {
            let Some(rel) = self.relationships.remove(key) else {
                continue;
            };
            freed += 1;
            let Some(inverse) = schema.inverse_of(rel.meta()) else {
                continue;
            };
            for member in rel.all_members() {
                if let Some(inverse_key) = self.existing_key(member, inverse)
                    && let Some(other) = self.relationships.get_mut(inverse_key)
                {
                    other.detach(identifier);
                }
            }
        }

        self.queue.retain(|pending| pending.identifier != identifier);
        for pending in &mut self.queue {
            if let Some(data) = &mut pending.update.data {
                data.strip(identifier);
            }
        }

        tracing::debug!(%identifier, freed, "removed identifier from graph");
        freed
    }

    // ── Mirroring ──

    fn mirror_add(
        &mut self,
        layer: Layer,
        meta: &RelationshipMeta,
        owner: Identifier,
        member: Identifier,
    ) {
        let schema = Arc::clone(&self.schema);
        let Some(inverse) = schema.inverse_of(meta) else {
            return;
        };
        let key = self.materialize(member, Arc::clone(inverse));
        if layer == Layer::Canonical {
            self.settle_to_one(key, Some(owner));
        }
        let displaced = self
            .relationships
            .get_mut(key)
            .and_then(|rel| rel.add(layer, owner));

        // member's to-one inverse moved off `previous`
        if let Some(previous) = displaced
            && let Some(previous_key) = self.existing_key(previous, meta)
        {
            if layer == Layer::Canonical {
                self.settle_removal(previous_key, member);
            }
            if let Some(rel) = self.relationships.get_mut(previous_key) {
                rel.remove(layer, member);
            }
        }
    }

    fn mirror_remove(
        &mut self,
        layer: Layer,
        meta: &RelationshipMeta,
        owner: Identifier,
        member: Identifier,
    ) {
        let schema = Arc::clone(&self.schema);
        let Some(inverse) = schema.inverse_of(meta) else {
            return;
        };
        let Some(key) = self.existing_key(member, inverse) else {
            return;
        };
        if layer == Layer::Canonical {
            self.settle_removal(key, owner);
        }
        if let Some(rel) = self.relationships.get_mut(key) {
            rel.remove(layer, owner);
        }
    }

    /// [`Graph::settle_to_one`] for a canonical removal of `member`, which
    /// only changes a to-one whose canonical value is `member`.
    fn settle_removal(&mut self, key: RelationshipKey, member: Identifier) {
        let holds = self
            .relationships
            .get(key)
            .is_some_and(|rel| rel.canonical_one() == Some(member));
        if holds {
            self.settle_to_one(key, None);
        }
    }

    // ── Storage ──

    fn meta_for(
        &self,
        ids: &IdentifierCache,
        identifier: Identifier,
        name: &str,
    ) -> Result<Arc<RelationshipMeta>, TetherError> {
        let type_name = ids.resolve(identifier)?.type_name();
        self.schema
            .lookup(type_name, name)
            .cloned()
            .ok_or_else(|| TetherError::UnknownRelationship {
                type_name: type_name.to_string(),
                name: name.to_string(),
            })
    }

    fn existing_key(
        &self,
        identifier: Identifier,
        meta: &RelationshipMeta,
    ) -> Option<RelationshipKey> {
        let containers = if meta.implicit {
            &self.implicit
        } else {
            &self.containers
        };
        containers
            .get(&identifier)?
            .get(&meta.name)
            .filter(|key| self.relationships.contains(*key))
    }

    fn materialize(
        &mut self,
        identifier: Identifier,
        meta: Arc<RelationshipMeta>,
    ) -> RelationshipKey {
        if let Some(key) = self.existing_key(identifier, &meta) {
            return key;
        }
        let name = meta.name.clone();
        let implicit = meta.implicit;
        let key = self.relationships.insert(Relationship::new(identifier, meta));

        let containers = if implicit {
            &mut self.implicit
        } else {
            &mut self.containers
        };
        containers
            .entry(identifier)
            .or_insert_with(|| Relationships::new(identifier))
            .insert(&name, key);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tether_kernel::{RelationshipDefinition, TypeDefinition};

    fn define(
        types: &mut BTreeMap<String, TypeDefinition>,
        owner: &str,
        name: &str,
        kind: RelationshipKind,
        related: &str,
        inverse: Option<&str>,
    ) {
        types
            .entry(owner.to_string())
            .or_default()
            .relationships
            .insert(
                name.to_string(),
                RelationshipDefinition {
                    kind,
                    related_type: related.to_string(),
                    inverse: inverse.map(ToOwned::to_owned),
                },
            );
    }

    fn blog_schema() -> Arc<Schema> {
        use RelationshipKind::{BelongsTo, HasMany};
        let mut types = BTreeMap::new();
        define(&mut types, "post", "comments", HasMany, "comment", Some("post"));
        define(&mut types, "comment", "post", BelongsTo, "post", Some("comments"));
        define(&mut types, "post", "author", BelongsTo, "user", None);
        define(&mut types, "user", "profile", BelongsTo, "profile", Some("user"));
        define(&mut types, "profile", "user", BelongsTo, "user", Some("profile"));
        Arc::new(Schema::new(&types))
    }

    struct Fixture {
        ids: IdentifierCache,
        graph: Graph,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                ids: IdentifierCache::new(),
                graph: Graph::new(blog_schema()),
            }
        }

        fn id(&mut self, type_name: &str, id: &str) -> Identifier {
            self.ids
                .get_or_create(type_name, Some(id), None)
                .expect("identifier")
        }

        fn push(&mut self, owner: Identifier, name: &str, update: CanonicalUpdate) -> bool {
            self.graph
                .push(&self.ids, owner, name, update)
                .expect("push should queue")
        }

        fn current(&self, owner: Identifier, name: &str) -> Vec<Identifier> {
            self.graph
                .peek(&self.ids, owner, name)
                .expect("known relationship")
                .map(Relationship::current)
                .unwrap_or_default()
        }
    }

    #[test]
    fn push_is_deferred_until_flush() {
        let mut fx = Fixture::new();
        let post = fx.id("post", "1");
        let comment = fx.id("comment", "10");

        assert!(fx.push(post, "comments", CanonicalUpdate::many([comment])));
        assert!(fx.current(post, "comments").is_empty());
        assert_eq!(fx.graph.pending(), 1);

        fx.graph.flush();
        assert_eq!(fx.current(post, "comments"), vec![comment]);
        assert_eq!(fx.current(comment, "post"), vec![post]);
    }

    #[test]
    fn one_flush_per_batch_and_pushes_apply_in_order() {
        let mut fx = Fixture::new();
        let post = fx.id("post", "1");
        let c = [fx.id("comment", "1"), fx.id("comment", "2"), fx.id("comment", "3")];

        assert!(fx.push(post, "comments", CanonicalUpdate::many([c[0]])));
        assert!(!fx.push(post, "comments", CanonicalUpdate::many([c[0], c[1]])));
        assert!(!fx.push(post, "comments", CanonicalUpdate::many([c[2], c[1]])));

        let report = fx.graph.flush();
        assert_eq!(
            report,
            FlushReport {
                applied: 3,
                to_many: 3,
                to_one: 0
            }
        );
        assert_eq!(fx.current(post, "comments"), vec![c[2], c[1]]);
        assert!(fx.current(c[0], "post").is_empty());
        assert_eq!(fx.current(c[2], "post"), vec![post]);

        assert_eq!(fx.graph.flush(), FlushReport::default());
        assert!(fx.push(post, "comments", CanonicalUpdate::many([])));
    }

    #[test]
    fn to_many_updates_flush_before_to_one() {
        let mut fx = Fixture::new();
        let first = fx.id("post", "1");
        let second = fx.id("post", "2");
        let comment = fx.id("comment", "10");

        fx.push(comment, "post", CanonicalUpdate::one(Some(second)));
        fx.push(first, "comments", CanonicalUpdate::many([comment]));
        let report = fx.graph.flush();
        assert_eq!((report.to_many, report.to_one), (1, 1));

        // the to-one update ran last and won
        assert_eq!(fx.current(comment, "post"), vec![second]);
        assert!(fx.current(first, "comments").is_empty());
        assert_eq!(fx.current(second, "comments"), vec![comment]);
    }

    #[test]
    fn local_add_sets_inverse_immediately() {
        let mut fx = Fixture::new();
        let post = fx.id("post", "1");
        let comment = fx.id("comment", "10");

        fx.graph
            .add_to_has_many(&fx.ids, post, "comments", comment)
            .expect("local add");

        assert_eq!(fx.current(comment, "post"), vec![post]);
        assert!(fx.graph.is_dirty(post));
        assert!(fx.graph.is_dirty(comment));
        assert_eq!(fx.graph.pending(), 0, "local edits are never queued");
    }

    #[test]
    fn moving_a_member_and_rolling_back_restores_both_owners() {
        let mut fx = Fixture::new();
        let first = fx.id("post", "1");
        let second = fx.id("post", "2");
        let comment = fx.id("comment", "10");
        fx.push(first, "comments", CanonicalUpdate::many([comment]));
        fx.graph.flush();

        fx.graph
            .add_to_has_many(&fx.ids, second, "comments", comment)
            .expect("move");
        assert_eq!(fx.current(comment, "post"), vec![second]);
        assert!(fx.current(first, "comments").is_empty());

        fx.graph
            .rollback(&fx.ids, second, "comments")
            .expect("rollback");
        assert_eq!(fx.current(comment, "post"), vec![first]);
        assert_eq!(fx.current(first, "comments"), vec![comment]);
        assert!(fx.current(second, "comments").is_empty());
        assert!(!fx.graph.is_dirty(first));
        assert!(!fx.graph.is_dirty(comment));
    }

    #[test]
    fn set_belongs_to_mirrors_and_rolls_back_from_the_to_one_side() {
        let mut fx = Fixture::new();
        let first = fx.id("post", "1");
        let second = fx.id("post", "2");
        let comment = fx.id("comment", "10");
        fx.push(comment, "post", CanonicalUpdate::one(Some(first)));
        fx.graph.flush();

        fx.graph
            .set_belongs_to(&fx.ids, comment, "post", Some(second))
            .expect("set");
        assert!(fx.current(first, "comments").is_empty());
        assert_eq!(fx.current(second, "comments"), vec![comment]);

        fx.graph.rollback(&fx.ids, comment, "post").expect("rollback");
        assert_eq!(fx.current(first, "comments"), vec![comment]);
        assert!(fx.current(second, "comments").is_empty());
    }

    #[test]
    fn server_to_one_update_replaces_local_set() {
        let mut fx = Fixture::new();
        let [p1, p2, p3] = [fx.id("post", "1"), fx.id("post", "2"), fx.id("post", "3")];
        let comment = fx.id("comment", "10");
        fx.push(comment, "post", CanonicalUpdate::one(Some(p1)));
        fx.graph.flush();

        fx.graph
            .set_belongs_to(&fx.ids, comment, "post", Some(p2))
            .expect("local set");
        fx.push(comment, "post", CanonicalUpdate::one(Some(p3)));
        fx.graph.flush();

        assert_eq!(fx.current(comment, "post"), vec![p3]);
        assert_eq!(fx.current(p3, "comments"), vec![comment]);
        assert!(fx.current(p2, "comments").is_empty());
        assert!(fx.current(p1, "comments").is_empty());
        assert!(!fx.graph.is_dirty(comment));
        assert!(!fx.graph.is_dirty(p1));
        assert!(!fx.graph.is_dirty(p2));

        fx.graph.rollback(&fx.ids, comment, "post").expect("rollback");
        fx.graph.rollback(&fx.ids, p2, "comments").expect("rollback");
        assert_eq!(fx.current(comment, "post"), vec![p3]);
        assert_eq!(fx.current(p3, "comments"), vec![comment]);
        assert!(fx.current(p2, "comments").is_empty());
    }

    #[test]
    fn server_has_many_update_replaces_local_clear() {
        let mut fx = Fixture::new();
        let [p1, p2] = [fx.id("post", "1"), fx.id("post", "2")];
        let comment = fx.id("comment", "10");
        fx.push(p1, "comments", CanonicalUpdate::many([comment]));
        fx.graph.flush();

        fx.graph
            .remove_from_has_many(&fx.ids, p1, "comments", comment)
            .expect("local removal");
        assert!(fx.current(comment, "post").is_empty());

        fx.push(p2, "comments", CanonicalUpdate::many([comment]));
        fx.graph.flush();

        assert_eq!(fx.current(comment, "post"), vec![p2]);
        assert_eq!(fx.current(p2, "comments"), vec![comment]);
        assert!(fx.current(p1, "comments").is_empty());
        assert!(!fx.graph.is_dirty(p1));
        assert!(!fx.graph.is_dirty(comment));

        fx.graph.rollback(&fx.ids, p1, "comments").expect("rollback");
        fx.graph.rollback(&fx.ids, comment, "post").expect("rollback");
        assert_eq!(fx.current(comment, "post"), vec![p2]);
        assert_eq!(fx.current(p2, "comments"), vec![comment]);
        assert!(fx.current(p1, "comments").is_empty());
    }

    #[test]
    fn unchanged_server_to_one_keeps_local_set() {
        let mut fx = Fixture::new();
        let [p1, p2] = [fx.id("post", "1"), fx.id("post", "2")];
        let comment = fx.id("comment", "10");
        fx.push(comment, "post", CanonicalUpdate::one(Some(p1)));
        fx.graph.flush();

        fx.graph
            .set_belongs_to(&fx.ids, comment, "post", Some(p2))
            .expect("local set");
        fx.push(comment, "post", CanonicalUpdate::one(Some(p1)));
        fx.graph.flush();

        assert_eq!(fx.current(comment, "post"), vec![p2]);
        assert_eq!(fx.current(p2, "comments"), vec![comment]);
        assert!(fx.current(p1, "comments").is_empty());
        assert!(fx.graph.is_dirty(comment));
    }

    #[test]
    fn one_to_one_cascade_displaces_previous_holder() {
        let mut fx = Fixture::new();
        let alice = fx.id("user", "a");
        let bob = fx.id("user", "b");
        let profile = fx.id("profile", "p");
        fx.push(alice, "profile", CanonicalUpdate::one(Some(profile)));
        fx.graph.flush();

        fx.push(bob, "profile", CanonicalUpdate::one(Some(profile)));
        fx.graph.flush();

        assert_eq!(fx.current(profile, "user"), vec![bob]);
        assert!(fx.current(alice, "profile").is_empty());
    }

    #[test]
    fn implicit_inverse_notifies_on_removal() {
        let mut fx = Fixture::new();
        let post = fx.id("post", "1");
        let user = fx.id("user", "u");
        fx.push(post, "author", CanonicalUpdate::one(Some(user)));
        fx.graph.flush();

        let implicit = fx.graph.get_implicit(&fx.ids, user).expect("implicit registry");
        assert!(implicit.has("implicit:post:author"));

        fx.graph.remove_identifier(user);
        assert!(fx.current(post, "author").is_empty());
    }

    #[test]
    fn removed_identifier_leaves_stale_relationship_handles() {
        let mut fx = Fixture::new();
        let post = fx.id("post", "1");
        let comment = fx.id("comment", "10");
        fx.push(post, "comments", CanonicalUpdate::many([comment]));
        fx.graph.flush();
        let key = fx
            .graph
            .relationship_key(&fx.ids, comment, "post")
            .expect("materialized");

        assert_eq!(fx.graph.remove_identifier(comment), 1);
        assert!(matches!(
            fx.graph.relationship(key),
            Err(TetherError::StaleRelationship(_))
        ));
        assert!(fx.current(post, "comments").is_empty());
    }

    #[test]
    fn removal_strips_queued_references() {
        let mut fx = Fixture::new();
        let post = fx.id("post", "1");
        let keep = fx.id("comment", "1");
        let gone = fx.id("comment", "2");

        fx.push(post, "comments", CanonicalUpdate::many([keep, gone]));
        fx.push(gone, "post", CanonicalUpdate::one(Some(post)));
        fx.graph.remove_identifier(gone);

        assert_eq!(fx.graph.flush().applied, 1);
        assert_eq!(fx.current(post, "comments"), vec![keep]);
    }

    #[test]
    fn push_validates_name_and_shape() {
        let mut fx = Fixture::new();
        let post = fx.id("post", "1");
        let comment = fx.id("comment", "1");

        let unknown = fx
            .graph
            .push(&fx.ids, post, "tags", CanonicalUpdate::many([]))
            .expect_err("undeclared");
        assert!(matches!(unknown, TetherError::UnknownRelationship { .. }));

        let shape = fx
            .graph
            .push(&fx.ids, post, "comments", CanonicalUpdate::one(Some(comment)))
            .expect_err("to-one payload on has-many");
        assert!(matches!(
            shape,
            TetherError::ShapeMismatch {
                expected: RelationshipKind::HasMany,
                ..
            }
        ));
        assert!(!fx.graph.has_pending());
    }

    #[test]
    fn local_ops_check_kind() {
        let mut fx = Fixture::new();
        let post = fx.id("post", "1");
        let user = fx.id("user", "u");

        let err = fx
            .graph
            .add_to_has_many(&fx.ids, post, "author", user)
            .expect_err("author is to-one");
        assert!(matches!(err, TetherError::ShapeMismatch { .. }));
    }
}
