//! Record store over the relationship graph.
//!
//! This crate turns normalized payloads into identifiers, attribute state
//! and queued relationship updates, and exposes the read view adapters use
//! to build outgoing requests.
//!
//! It does not perform requests or normalize wire documents; callers hand
//! it [`NormalizedResource`]s and drive [`Store::flush`] once per turn.

mod config;
mod payload;
mod record_data;
mod snapshot;
mod store;

pub use config::{ConfigError, StoreConfig};
pub use payload::{
    Attributes, NormalizedResource, RelationshipDocument, RelationshipValue, ResourceLinkage,
    ResourceReference,
};
pub use record_data::{ChangedAttributes, DirtyType, RecordData};
pub use snapshot::Snapshot;
pub use store::Store;

pub use tether_graph::{FlushReport, Links, RelationshipState};
pub use tether_kernel::{
    Identifier, IdentifierRecord, RelationshipDefinition, RelationshipKind, TetherError,
};
