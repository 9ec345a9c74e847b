use indexmap::IndexMap;
use std::collections::HashMap;

use crate::entity::{walk_path, Entity};
use crate::error::{BulkCopyError, Result};
use crate::metadata::TypeColumnSet;
use crate::value::{SqlType, SqlValue};

/// A writable source-to-destination column pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    /// Unified column name on the cursor side.
    pub source: String,
    /// Destination column name in the target table.
    pub destination: String,
}

/// How one column is read for one concrete type.
#[derive(Debug)]
enum Selector {
    /// Fixed literal (discriminators).
    Literal(SqlValue<'static>),
    /// Property path walked over the entity.
    Path(Vec<String>),
}

/// The unified column layout for a type hierarchy sharing one table.
///
/// Built once per insert from the column sets of every concrete type in
/// the hierarchy. Column names claim indexes first-come-first-served in
/// declaration order; a name repeated by a sibling type reuses the index
/// it already holds, so every row has the same width regardless of its
/// concrete type.
#[derive(Debug)]
pub struct ColumnPlan {
    schema: String,
    table: String,
    /// Unified column name to index, in claim order.
    indexes: IndexMap<String, usize>,
    /// First-seen descriptor type per index, for typed nulls.
    slot_types: Vec<SqlType>,
    /// Per-type accessor vectors, one slot per column index. `None` slots
    /// belong to sibling types and read as NULL.
    selectors: HashMap<String, Vec<Option<Selector>>>,
    /// Writable column pairs. Identity columns are listed only when the
    /// plan was built with keep-identity; they hold an index either way.
    mappings: Vec<ColumnBinding>,
}

impl ColumnPlan {
    /// Build the unified plan from the column sets of a hierarchy.
    ///
    /// Fails with [`BulkCopyError::Config`] when `column_sets` is empty or
    /// the sets do not all name the same destination table.
    pub fn build(column_sets: &[&TypeColumnSet], keep_identity: bool) -> Result<Self> {
        let first = column_sets.first().ok_or_else(|| {
            BulkCopyError::Config("Cannot build a column plan from zero column sets".to_string())
        })?;

        for set in &column_sets[1..] {
            if set.schema != first.schema || set.table != first.table {
                return Err(BulkCopyError::Config(format!(
                    "Column sets span multiple tables: {}.{} vs {}.{} (type '{}')",
                    first.schema, first.table, set.schema, set.table, set.type_tag
                )));
            }
        }

        // Pass 1: claim a slot per distinct column name and collect the
        // writable mapping list.
        let mut indexes: IndexMap<String, usize> = IndexMap::new();
        let mut slot_types: Vec<SqlType> = Vec::new();
        let mut mappings: Vec<ColumnBinding> = Vec::new();
        for set in column_sets {
            for col in set.columns.iter().filter(|c| c.is_mapped()) {
                if indexes.contains_key(&col.column_name) {
                    continue;
                }
                indexes.insert(col.column_name.clone(), slot_types.len());
                slot_types.push(col.sql_type);
                if !col.is_identity || keep_identity {
                    mappings.push(ColumnBinding {
                        source: col.column_name.clone(),
                        destination: col.column_name.clone(),
                    });
                }
            }
        }

        // Pass 2: bind an accessor per type per claimed slot.
        let width = slot_types.len();
        let mut selectors: HashMap<String, Vec<Option<Selector>>> = HashMap::new();
        for set in column_sets {
            let mut accessors: Vec<Option<Selector>> = (0..width).map(|_| None).collect();
            for col in set.columns.iter().filter(|c| c.is_mapped()) {
                let idx = indexes[&col.column_name];
                let selector = if col.is_discriminator {
                    let literal = col
                        .default_value
                        .clone()
                        .unwrap_or(SqlValue::Null(col.sql_type));
                    Selector::Literal(literal)
                } else {
                    Selector::Path(col.property_path.clone())
                };
                accessors[idx] = Some(selector);
            }
            selectors.insert(set.type_tag.clone(), accessors);
        }

        Ok(Self {
            schema: first.schema.clone(),
            table: first.table.clone(),
            indexes,
            slot_types,
            selectors,
            mappings,
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Width of a row, reserved identity slots included.
    pub fn field_count(&self) -> usize {
        self.slot_types.len()
    }

    pub fn mappings(&self) -> &[ColumnBinding] {
        &self.mappings
    }

    pub fn ordinal(&self, column: &str) -> Option<usize> {
        self.indexes.get(column).copied()
    }

    /// Read one column of one entity.
    ///
    /// Unmapped slots (columns claimed by sibling types) and null
    /// navigation links both read as a typed NULL.
    pub fn value_for(&self, entity: &dyn Entity, index: usize) -> SqlValue<'static> {
        let null = SqlValue::Null(self.slot_types[index]);
        let selector = self
            .selectors
            .get(entity.type_tag())
            .and_then(|accessors| accessors[index].as_ref());
        match selector {
            None => null,
            Some(Selector::Literal(v)) => v.clone(),
            Some(Selector::Path(path)) => walk_path(entity, path).unwrap_or(null),
        }
    }
}
