//! Relationship schema: declared fields and their resolved descriptors.
//!
//! Schemas are declared per type (`post.comments: has-many comment, inverse
//! post`). [`Schema::new`] resolves every declaration exactly once into a
//! [`RelationshipMeta`] that names its inverse explicitly:
//!
//! ```text
//! declared inverse exists on the related type and points back
//!     → Inverse::Declared(name)
//! no inverse declared, inverse missing, or inverse points elsewhere
//!     → Inverse::Implicit("implicit:{owner_type}:{name}")
//! ```
//!
//! Implicit inverses get a synthetic to-many descriptor on the related type
//! so that removing an entity can still notify whoever referenced it.

use crate::error::TetherError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

pub const IMPLICIT_PREFIX: &str = "implicit";

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipKind {
    BelongsTo,
    HasMany,
}

impl RelationshipKind {
    pub fn is_to_many(self) -> bool {
        matches!(self, RelationshipKind::HasMany)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::BelongsTo => "belongs-to",
            RelationshipKind::HasMany => "has-many",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared relationship field, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDefinition {
    pub kind: RelationshipKind,
    #[serde(rename = "type")]
    pub related_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
}

/// Declared relationship fields of one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipDefinition>,
}

/// How a relationship reaches its reciprocal side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Inverse {
    /// A field declared on the related type.
    Declared(String),
    /// A synthetic tracking edge in the related identifier's implicit registry.
    Implicit(String),
}

impl Inverse {
    pub fn name(&self) -> &str {
        match self {
            Inverse::Declared(name) | Inverse::Implicit(name) => name,
        }
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self, Inverse::Implicit(_))
    }
}

/// Resolved descriptor for one relationship, cached on every relationship
/// instance built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipMeta {
    pub owner_type: String,
    pub name: String,
    pub kind: RelationshipKind,
    pub related_type: String,
    pub inverse: Inverse,
    /// True for synthetic descriptors living in the implicit registry.
    pub implicit: bool,
}

impl RelationshipMeta {
    pub fn is_to_many(&self) -> bool {
        self.kind.is_to_many()
    }
}

pub fn implicit_name(owner_type: &str, name: &str) -> String {
    format!("{IMPLICIT_PREFIX}:{owner_type}:{name}")
}

type MetaTable = HashMap<String, BTreeMap<String, Arc<RelationshipMeta>>>;

/// Resolved relationship schema for every declared type.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    declared: MetaTable,
    implicit: MetaTable,
}

impl Schema {
    /// Resolve all declarations. Inconsistent inverses degrade to implicit
    /// tracking with a warning.
    pub fn new(types: &BTreeMap<String, TypeDefinition>) -> Self {
        let mut declared: MetaTable = HashMap::new();
        let mut implicit: MetaTable = HashMap::new();

        for (owner_type, definition) in types {
            for (name, field) in &definition.relationships {
                let inverse = resolve_inverse(types, owner_type, name, field);
                if let Inverse::Implicit(synthetic) = &inverse {
                    implicit
                        .entry(field.related_type.clone())
                        .or_default()
                        .insert(
                            synthetic.clone(),
                            Arc::new(RelationshipMeta {
                                owner_type: field.related_type.clone(),
                                name: synthetic.clone(),
                                kind: RelationshipKind::HasMany,
                                related_type: owner_type.clone(),
                                inverse: Inverse::Declared(name.clone()),
                                implicit: true,
                            }),
                        );
                }

                declared.entry(owner_type.clone()).or_default().insert(
                    name.clone(),
                    Arc::new(RelationshipMeta {
                        owner_type: owner_type.clone(),
                        name: name.clone(),
                        kind: field.kind,
                        related_type: field.related_type.clone(),
                        inverse,
                        implicit: false,
                    }),
                );
            }
        }

        Self { declared, implicit }
    }

    /// Descriptor of a declared relationship.
    pub fn relationship(
        &self,
        type_name: &str,
        name: &str,
    ) -> Result<&Arc<RelationshipMeta>, TetherError> {
        self.declared
            .get(type_name)
            .and_then(|fields| fields.get(name))
            .ok_or_else(|| TetherError::UnknownRelationship {
                type_name: type_name.to_string(),
                name: name.to_string(),
            })
    }

    /// Descriptor of a declared or implicit relationship.
    pub fn lookup(&self, type_name: &str, name: &str) -> Option<&Arc<RelationshipMeta>> {
        self.declared
            .get(type_name)
            .and_then(|fields| fields.get(name))
            .or_else(|| self.implicit.get(type_name).and_then(|f| f.get(name)))
    }

    /// Descriptor of the reciprocal side of `meta`.
    pub fn inverse_of(&self, meta: &RelationshipMeta) -> Option<&Arc<RelationshipMeta>> {
        self.lookup(&meta.related_type, meta.inverse.name())
    }

    /// Declared relationships of a type in name order.
    pub fn relationships_of<'a>(
        &'a self,
        type_name: &str,
    ) -> impl Iterator<Item = &'a Arc<RelationshipMeta>> + 'a {
        self.declared
            .get(type_name)
            .into_iter()
            .flat_map(|fields| fields.values())
    }
}

fn resolve_inverse(
    types: &BTreeMap<String, TypeDefinition>,
    owner_type: &str,
    name: &str,
    field: &RelationshipDefinition,
) -> Inverse {
    let Some(inverse_name) = &field.inverse else {
        return Inverse::Implicit(implicit_name(owner_type, name));
    };

    let counterpart = types
        .get(&field.related_type)
        .and_then(|related| related.relationships.get(inverse_name));

    match counterpart {
        Some(other)
            if other.related_type == owner_type && other.inverse.as_deref() == Some(name) =>
        {
            Inverse::Declared(inverse_name.clone())
        }
        Some(_) => {
            tracing::warn!(
                owner_type,
                name,
                inverse = %inverse_name,
                related_type = %field.related_type,
                "declared inverse does not point back, tracking implicitly"
            );
            Inverse::Implicit(implicit_name(owner_type, name))
        }
        None => {
            tracing::warn!(
                owner_type,
                name,
                inverse = %inverse_name,
                related_type = %field.related_type,
                "declared inverse is missing on related type, tracking implicitly"
            );
            Inverse::Implicit(implicit_name(owner_type, name))
        }
    }
}
