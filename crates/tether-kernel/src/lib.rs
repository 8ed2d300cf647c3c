//! # Tether Kernel
//!
//! Identity and schema primitives shared by the relationship graph and the
//! record store.
//!
//! This crate is **state-agnostic**: it does not know about canonical or
//! local relationship state. It only prescribes how entities are identified
//! and how relationship fields pair up with their inverses.
//!
//! ## Architecture
//!
//! ```text
//! Arena<K, T>          ← generation-checked slot storage, copyable keys
//!     │
//! IdentifierCache      ← (type, id) / lid → Identifier, merge in place
//!     │
//! Schema               ← declared fields → RelationshipMeta (inverse resolved once)
//! ```

pub mod arena;
pub mod error;
pub mod identifier;
pub mod schema;

pub use arena::{Arena, ArenaKey, Handle};
pub use error::TetherError;
pub use identifier::{DEFAULT_LID_PREFIX, Identifier, IdentifierCache, IdentifierRecord};
pub use schema::{
    IMPLICIT_PREFIX, Inverse, RelationshipDefinition, RelationshipKind, RelationshipMeta, Schema,
    TypeDefinition, implicit_name,
};
