//! Column-mapping metadata: the contract between an object mapper and the
//! flattening engine.
//!
//! Descriptors are produced once per type by a [`MappingProvider`] (typically
//! an ORM integration layer) and are read-only afterwards. The engine never
//! inspects entity structs directly; everything it knows about a type comes
//! from its [`TypeColumnSet`].

use serde::{Deserialize, Serialize};

use crate::error::{BulkCopyError, Result};
use crate::value::{SqlType, SqlValue};

/// Describes one column of a target table for one entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name, unique within a table.
    pub column_name: String,

    /// Source property path, ordered outermost-first. Supports nested access
    /// (e.g. `["contact", "address", "city"]`).
    pub property_path: Vec<String>,

    /// Column type, used to emit correctly typed NULLs on the wire.
    pub sql_type: SqlType,

    /// Whether the destination assigns this column's value (identity/serial).
    pub is_identity: bool,

    /// Whether the column is server-computed and must never be written.
    pub is_computed: bool,

    /// Whether the column holds a fixed literal identifying the concrete
    /// type in single-table inheritance.
    pub is_discriminator: bool,

    /// Whether the source property is a navigation reference.
    pub is_navigation: bool,

    /// Whether a navigation is backed by a scalar foreign key column.
    pub is_foreign_key: bool,

    /// Fixed literal for discriminator columns.
    pub default_value: Option<SqlValue<'static>>,
}

impl ColumnDescriptor {
    /// A plain scalar column read from a property path.
    pub fn scalar(column_name: impl Into<String>, path: &[&str], sql_type: SqlType) -> Self {
        Self {
            column_name: column_name.into(),
            property_path: path.iter().map(|s| s.to_string()).collect(),
            sql_type,
            is_identity: false,
            is_computed: false,
            is_discriminator: false,
            is_navigation: false,
            is_foreign_key: false,
            default_value: None,
        }
    }

    /// Mark this column as destination-assigned.
    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self
    }

    /// Mark this column as server-computed (never written).
    pub fn computed(mut self) -> Self {
        self.is_computed = true;
        self
    }

    /// Mark this column as a navigation reference; `foreign_key` selects
    /// whether a scalar FK column backs it.
    pub fn navigation(mut self, foreign_key: bool) -> Self {
        self.is_navigation = true;
        self.is_foreign_key = foreign_key;
        self
    }

    /// A discriminator column with its fixed literal.
    pub fn discriminator(column_name: impl Into<String>, literal: SqlValue<'static>) -> Self {
        Self {
            column_name: column_name.into(),
            property_path: Vec::new(),
            sql_type: literal.sql_type(),
            is_identity: false,
            is_computed: false,
            is_discriminator: true,
            is_navigation: false,
            is_foreign_key: false,
            default_value: Some(literal),
        }
    }

    /// Whether this column contributes to the cursor at all.
    ///
    /// Computed columns are never written; plain navigations carry no
    /// column, FK-backed navigations surface the FK scalar.
    pub fn is_mapped(&self) -> bool {
        !self.is_computed && (!self.is_navigation || self.is_foreign_key)
    }
}

/// The ordered column set one concrete entity type contributes to one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeColumnSet {
    /// Type tag, matched against [`Entity::type_tag`](crate::entity::Entity).
    pub type_tag: String,

    /// Destination schema name.
    pub schema: String,

    /// Destination table name.
    pub table: String,

    /// Column descriptors in declaration order.
    pub columns: Vec<ColumnDescriptor>,
}

impl TypeColumnSet {
    pub fn new(
        type_tag: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
    ) -> Self {
        Self {
            type_tag: type_tag.into(),
            schema: schema.into(),
            table: table.into(),
            columns,
        }
    }
}

/// Supplies per-type column metadata.
///
/// Implementations must be deterministic and side-effect-free for a given
/// type within a process lifetime.
pub trait MappingProvider: Send + Sync {
    /// Get the column set for a concrete type tag.
    fn column_set(&self, type_tag: &str) -> Option<&TypeColumnSet>;

    /// The concrete-type closure of a declared element type (the type itself
    /// when concrete, plus every registered subtype), in registration order.
    fn derived_types<'a>(&'a self, base_tag: &'a str) -> Vec<&'a str>;
}

/// Explicitly constructed mapping registry.
///
/// Column sets are registered once at composition time and read-only
/// afterwards. Subtype edges drive polymorphic (shared-table) inserts.
#[derive(Debug, Default)]
pub struct MappingCatalog {
    sets: Vec<TypeColumnSet>,
    /// (base tag, derived tag) edges in registration order.
    subtypes: Vec<(String, String)>,
}

impl MappingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the column set for a concrete type.
    pub fn register(&mut self, set: TypeColumnSet) {
        self.sets.push(set);
    }

    /// Record that `derived` is a concrete subtype of `base`.
    pub fn register_subtype(&mut self, base: impl Into<String>, derived: impl Into<String>) {
        self.subtypes.push((base.into(), derived.into()));
    }
}

/// Resolve the column sets for every type in a base tag's concrete-type
/// closure, failing `Config` when the closure is empty or a type in it has
/// no registered column set.
pub fn column_sets_for<'a>(
    mappings: &'a dyn MappingProvider,
    base_tag: &str,
) -> Result<Vec<&'a TypeColumnSet>> {
    let tags = mappings.derived_types(base_tag);
    if tags.is_empty() {
        return Err(BulkCopyError::Config(format!(
            "No column sets registered for type '{}' or its subtypes",
            base_tag
        )));
    }
    tags.into_iter()
        .map(|tag| {
            mappings.column_set(tag).ok_or_else(|| {
                BulkCopyError::Config(format!("No column set registered for type '{}'", tag))
            })
        })
        .collect()
}

impl MappingProvider for MappingCatalog {
    fn column_set(&self, type_tag: &str) -> Option<&TypeColumnSet> {
        self.sets.iter().find(|s| s.type_tag == type_tag)
    }

    fn derived_types<'a>(&'a self, base_tag: &'a str) -> Vec<&'a str> {
        let mut tags = Vec::new();
        if self.column_set(base_tag).is_some() {
            tags.push(base_tag);
        }
        // Walk the subtype edges transitively, preserving registration order.
        let mut frontier = vec![base_tag];
        while let Some(tag) = frontier.pop() {
            for (base, derived) in &self.subtypes {
                if base == tag && !tags.contains(&derived.as_str()) {
                    tags.push(derived.as_str());
                    frontier.push(derived.as_str());
                }
            }
        }
        tags
    }
}

/// The caller-side context a bulk insert runs against: which connection kind
/// to route to, and where column metadata comes from.
pub trait BulkContext: Send + Sync {
    /// Connection-kind identifier used to look up a provider
    /// (e.g. `"postgres"`, `"mssql"`).
    fn connection_kind(&self) -> &str;

    /// The metadata adapter for this context's model.
    fn mappings(&self) -> &dyn MappingProvider;
}
