//! Attribute state of one record.
//!
//! ```text
//! canonical   last server-confirmed attributes
//! in-flight   local edits handed to a save that has not answered yet
//! local       edits not yet handed to a save
//! ```
//!
//! Reads resolve `local > in-flight > canonical`.

use crate::payload::Attributes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tether_kernel::TetherError;

/// Why a record differs from the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirtyType {
    #[default]
    None,
    Created,
    Updated,
    Deleted,
}

/// `key → (canonical value before the edit, edited value)`.
pub type ChangedAttributes = BTreeMap<String, (Option<Value>, Value)>;

#[derive(Debug, Clone)]
pub struct RecordData {
    lid: String,
    canonical: Attributes,
    in_flight: Attributes,
    local: Attributes,
    dirty: DirtyType,
    is_new: bool,
    destroyed: bool,
}

impl RecordData {
    /// Record data for an entity known to the server.
    pub fn new(lid: impl Into<String>) -> Self {
        Self {
            lid: lid.into(),
            canonical: Attributes::new(),
            in_flight: Attributes::new(),
            local: Attributes::new(),
            dirty: DirtyType::None,
            is_new: false,
            destroyed: false,
        }
    }

    /// Record data for an entity created on the client.
    pub fn created(lid: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            local: attributes,
            dirty: DirtyType::Created,
            is_new: true,
            ..Self::new(lid)
        }
    }

    pub fn lid(&self) -> &str {
        &self.lid
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Fails with [`TetherError::Destroyed`] once the record is gone.
    pub fn ensure_live(&self) -> Result<(), TetherError> {
        if self.destroyed {
            return Err(TetherError::Destroyed {
                lid: self.lid.clone(),
            });
        }
        Ok(())
    }

    /// Merge server attributes. Local edits equal to the new canonical value
    /// are dropped so they stop reading as dirty.
    pub fn push_data(&mut self, attributes: &Attributes) -> Result<(), TetherError> {
        self.ensure_live()?;
        for (key, value) in attributes {
            self.canonical.insert(key.clone(), value.clone());
        }
        self.drop_confirmed();
        self.settle();
        Ok(())
    }

    pub fn set_attribute(&mut self, key: &str, value: Value) -> Result<(), TetherError> {
        self.ensure_live()?;
        let confirmed =
            !self.in_flight.contains_key(key) && self.canonical.get(key) == Some(&value);
        if confirmed {
            self.local.remove(key);
        } else {
            self.local.insert(key.to_string(), value);
        }
        if self.dirty == DirtyType::None && !self.local.is_empty() {
            self.dirty = DirtyType::Updated;
        }
        self.settle();
        Ok(())
    }

    pub fn attribute(&self, key: &str) -> Result<Option<&Value>, TetherError> {
        self.ensure_live()?;
        Ok(self
            .local
            .get(key)
            .or_else(|| self.in_flight.get(key))
            .or_else(|| self.canonical.get(key)))
    }

    /// Current projection of every attribute.
    pub fn attributes(&self) -> Result<Attributes, TetherError> {
        self.ensure_live()?;
        let mut out = self.canonical.clone();
        for layer in [&self.in_flight, &self.local] {
            for (key, value) in layer {
                out.insert(key.clone(), value.clone());
            }
        }
        Ok(out)
    }

    pub fn dirty_type(&self) -> DirtyType {
        self.dirty
    }

    pub fn is_dirty(&self) -> Result<bool, TetherError> {
        self.ensure_live()?;
        Ok(self.dirty != DirtyType::None)
    }

    /// True until the server confirms the record.
    pub fn is_new(&self) -> Result<bool, TetherError> {
        self.ensure_live()?;
        Ok(self.is_new)
    }

    /// The server named this record's id. It is no longer new, and any
    /// local attributes left over read as an update.
    pub fn confirm(&mut self) {
        if !self.is_new {
            return;
        }
        self.is_new = false;
        if self.dirty == DirtyType::Created {
            self.dirty = DirtyType::Updated;
            self.settle();
        }
    }

    pub fn changed_attributes(&self) -> Result<ChangedAttributes, TetherError> {
        self.ensure_live()?;
        Ok(self
            .local
            .iter()
            .map(|(key, value)| {
                (
                    key.clone(),
                    (self.canonical.get(key).cloned(), value.clone()),
                )
            })
            .collect())
    }

    /// Drop local edits. Returns the keys that were rolled back.
    pub fn rollback_attributes(&mut self) -> Result<Vec<String>, TetherError> {
        self.ensure_live()?;
        let mut keys: Vec<String> = self.local.keys().cloned().collect();
        keys.sort();
        self.local.clear();
        if self.dirty == DirtyType::Deleted {
            self.dirty = DirtyType::Updated;
        }
        self.settle();
        Ok(keys)
    }

    /// Flag the record for deletion on its next save.
    pub fn mark_deleted(&mut self) -> Result<(), TetherError> {
        self.ensure_live()?;
        self.dirty = DirtyType::Deleted;
        Ok(())
    }

    /// A save started: local edits move in flight.
    pub fn will_commit(&mut self) -> Result<(), TetherError> {
        self.ensure_live()?;
        let local = std::mem::take(&mut self.local);
        self.in_flight.extend(local);
        Ok(())
    }

    /// The save succeeded. In-flight edits and the response attributes
    /// become canonical.
    pub fn did_commit(&mut self, response: Option<&Attributes>) -> Result<(), TetherError> {
        self.ensure_live()?;
        let in_flight = std::mem::take(&mut self.in_flight);
        self.canonical.extend(in_flight);
        if let Some(attributes) = response {
            for (key, value) in attributes {
                self.canonical.insert(key.clone(), value.clone());
            }
        }
        self.is_new = false;
        self.dirty = DirtyType::None;
        self.drop_confirmed();
        if !self.local.is_empty() {
            self.dirty = DirtyType::Updated;
        }
        Ok(())
    }

    /// The save failed. In-flight edits return to the local layer unless a
    /// newer local edit exists for the same key.
    pub fn commit_was_rejected(&mut self) -> Result<(), TetherError> {
        self.ensure_live()?;
        let in_flight = std::mem::take(&mut self.in_flight);
        for (key, value) in in_flight {
            self.local.entry(key).or_insert(value);
        }
        Ok(())
    }

    /// Every later access fails with [`TetherError::Destroyed`].
    pub fn destroy(&mut self) {
        self.destroyed = true;
        self.canonical.clear();
        self.in_flight.clear();
        self.local.clear();
        tracing::debug!(lid = %self.lid, "destroyed record data");
    }

    fn drop_confirmed(&mut self) {
        let canonical = &self.canonical;
        let in_flight = &self.in_flight;
        self.local.retain(|key, value| {
            in_flight.contains_key(key) || canonical.get(key) != Some(value)
        });
    }

    // An update with nothing left to send is clean again.
    fn settle(&mut self) {
        if self.dirty == DirtyType::Updated && self.local.is_empty() && self.in_flight.is_empty() {
            self.dirty = DirtyType::None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[test]
    fn local_edit_wins_until_rolled_back() {
        let mut record = RecordData::new("@lid:post-1");
        record
            .push_data(&attrs(json!({"title": "Hello", "body": "…"})))
            .expect("push");
        record.set_attribute("title", json!("Draft")).expect("set");

        assert_eq!(record.attribute("title").expect("live"), Some(&json!("Draft")));
        assert_eq!(record.dirty_type(), DirtyType::Updated);
        assert_eq!(
            record.changed_attributes().expect("live")["title"],
            (Some(json!("Hello")), json!("Draft"))
        );

        assert_eq!(record.rollback_attributes().expect("live"), vec!["title".to_string()]);
        assert_eq!(record.attribute("title").expect("live"), Some(&json!("Hello")));
        assert!(!record.is_dirty().expect("live"));
    }

    #[test]
    fn push_clears_local_edit_matching_canonical() {
        let mut record = RecordData::new("@lid:post-1");
        record.push_data(&attrs(json!({"title": "Hello"}))).expect("push");
        record.set_attribute("title", json!("World")).expect("set");

        record.push_data(&attrs(json!({"title": "World"}))).expect("push");

        assert!(record.changed_attributes().expect("live").is_empty());
        assert!(!record.is_dirty().expect("live"));
    }

    #[test]
    fn setting_back_to_canonical_is_clean() {
        let mut record = RecordData::new("@lid:post-1");
        record.push_data(&attrs(json!({"title": "Hello"}))).expect("push");
        record.set_attribute("title", json!("Other")).expect("set");
        record.set_attribute("title", json!("Hello")).expect("set");
        assert!(!record.is_dirty().expect("live"));
    }

    #[test]
    fn save_lifecycle_moves_edits_through_in_flight() {
        let mut record = RecordData::created("@lid:post-1", attrs(json!({"title": "New"})));
        assert!(record.is_new().expect("live"));
        assert_eq!(record.dirty_type(), DirtyType::Created);

        record.will_commit().expect("will commit");
        record.set_attribute("body", json!("typed during save")).expect("set");
        assert_eq!(record.attribute("title").expect("live"), Some(&json!("New")));

        record
            .did_commit(Some(&attrs(json!({"createdAt": "2026-01-01"}))))
            .expect("did commit");
        assert!(!record.is_new().expect("live"));
        assert_eq!(record.dirty_type(), DirtyType::Updated, "body is still local");
        assert_eq!(
            record.attributes().expect("live"),
            attrs(json!({"title": "New", "createdAt": "2026-01-01", "body": "typed during save"}))
        );
    }

    #[test]
    fn confirm_ends_created_state() {
        let mut record = RecordData::created("@lid:comment-1", attrs(json!({"body": "hi"})));
        record.confirm();
        assert!(!record.is_new().expect("live"));
        assert_eq!(record.dirty_type(), DirtyType::Updated, "body was never saved");

        let mut empty = RecordData::created("@lid:comment-2", Attributes::new());
        empty.confirm();
        assert!(!empty.is_dirty().expect("live"));
    }

    #[test]
    fn rejected_commit_returns_edits_to_local() {
        let mut record = RecordData::new("@lid:post-1");
        record.push_data(&attrs(json!({"title": "Hello"}))).expect("push");
        record.set_attribute("title", json!("A")).expect("set");
        record.will_commit().expect("will commit");
        record.set_attribute("title", json!("B")).expect("set");

        record.commit_was_rejected().expect("rejected");
        assert_eq!(record.attribute("title").expect("live"), Some(&json!("B")));
        assert_eq!(
            record.changed_attributes().expect("live")["title"],
            (Some(json!("Hello")), json!("B"))
        );
    }

    #[test]
    fn destroyed_record_refuses_access() {
        let mut record = RecordData::new("@lid:post-1");
        record.destroy();

        let err = record.attribute("title").expect_err("destroyed");
        assert!(matches!(err, TetherError::Destroyed { lid } if lid == "@lid:post-1"));
        assert!(record.set_attribute("title", json!("x")).is_err());
        assert!(record.push_data(&Attributes::new()).is_err());
    }
}
