//! # tether-graph
//!
//! Relationship layer: who points at whom, canonically and optimistically.
//!
//! This crate provides:
//! - `Relationship` (one named field on one entity, canonical + overlay)
//! - `Relationships` (per-entity name → relationship handle container)
//! - `Graph` (store-scoped owner: push queue, flush, inverse mirroring,
//!   rollback, identifier removal)
//!
//! It intentionally knows nothing about attributes or payload parsing.
//! Those concerns live in `tether-store`.
//!
//! ## Data model
//!
//! ```text
//! push(identifier, name, update)     ─┐
//!                                     ├─ queue ── flush ──► canonical layer ──► inverse canonical
//! add / remove / set (local edits) ───┴──────────────────► overlay layer   ──► inverse overlay
//! ```

pub mod graph;
pub mod relationship;
pub mod relationships;
pub mod update;

pub use graph::{FlushReport, Graph};
pub use relationship::{MembershipDiff, Relationship, RelationshipKey, RelationshipState};
pub use relationships::Relationships;
pub use update::{CanonicalUpdate, Linkage, Links};
