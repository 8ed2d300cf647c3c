//! Error types for identity and graph consistency violations.

use crate::arena::Handle;
use crate::identifier::Identifier;
use crate::schema::RelationshipKind;

/// Errors raised by the identity map, the relationship graph and record data.
///
/// Identity conflicts and stale/destroyed access are unrecoverable for the
/// caller's operation. Schema-shape oddities (missing inverses, links-only
/// payloads) are resolved by policy and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    /// A server id resolves to two different existing identifiers.
    #[error(
        "identity conflict: {type_name}:{id} is bound to {existing_lid}, not {incoming_lid}"
    )]
    IdentityConflict {
        type_name: String,
        id: String,
        existing_lid: String,
        incoming_lid: String,
    },

    /// An identifier that already carries a server id was given another one.
    #[error("identifier {lid} already has id {current}, refusing to rebind it to {incoming}")]
    IdReassigned {
        lid: String,
        current: String,
        incoming: String,
    },

    /// A lid was presented with a type other than the one it was minted for.
    #[error("lid {lid} belongs to type {found}, not {expected}")]
    TypeMismatch {
        lid: String,
        expected: String,
        found: String,
    },

    /// The identifier was released by an unload.
    #[error("stale identifier: {0}")]
    StaleIdentifier(Identifier),

    /// A relationship handle outlived the relationship it pointed at.
    #[error("stale relationship handle: {0}")]
    StaleRelationship(Handle),

    /// The record behind the identifier was deleted or unloaded.
    #[error("record {lid} was destroyed")]
    Destroyed { lid: String },

    #[error("unknown relationship: {type_name}.{name}")]
    UnknownRelationship { type_name: String, name: String },

    /// A payload or local operation does not match the relationship kind.
    #[error("shape mismatch for {type_name}.{name}: relationship is {expected}")]
    ShapeMismatch {
        type_name: String,
        name: String,
        expected: RelationshipKind,
    },
}
