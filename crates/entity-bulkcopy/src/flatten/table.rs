use crate::entity::Entity;
use crate::error::Result;
use crate::flatten::plan::{ColumnBinding, ColumnPlan};
use crate::flatten::RowCursor;
use crate::metadata::TypeColumnSet;
use crate::value::SqlValue;

/// Eagerly materialized rows for a set of entities.
///
/// Flattens every entity up front through the same column plan the
/// streaming cursor uses, then serves rows from memory. Useful when the
/// source iterator cannot be sent to a provider, or when rows need to be
/// inspected (or retried) before transport. Costs O(rows) memory where
/// [`MappedRowCursor`](crate::flatten::MappedRowCursor) costs O(1).
pub struct EntityTable {
    plan: ColumnPlan,
    rows: Vec<Vec<SqlValue<'static>>>,
    /// Row the cursor is positioned on, `None` before the first
    /// [`advance`](RowCursor::advance) and after exhaustion.
    position: Option<usize>,
    next: usize,
}

impl EntityTable {
    /// Flatten `entities` through the hierarchy's unified column plan.
    pub fn build<E, T>(entities: T, column_sets: &[&TypeColumnSet], keep_identity: bool) -> Result<Self>
    where
        E: Entity,
        T: IntoIterator<Item = E>,
    {
        let plan = ColumnPlan::build(column_sets, keep_identity)?;
        let width = plan.field_count();
        let rows = entities
            .into_iter()
            .map(|entity| (0..width).map(|i| plan.value_for(&entity, i)).collect())
            .collect();
        Ok(Self {
            plan,
            rows,
            position: None,
            next: 0,
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Random access to a materialized row.
    pub fn row(&self, index: usize) -> Option<&[SqlValue<'static>]> {
        self.rows.get(index).map(|r| r.as_slice())
    }
}

impl RowCursor for EntityTable {
    fn schema(&self) -> &str {
        self.plan.schema()
    }

    fn table(&self) -> &str {
        self.plan.table()
    }

    fn field_count(&self) -> usize {
        self.plan.field_count()
    }

    fn column_mappings(&self) -> &[ColumnBinding] {
        self.plan.mappings()
    }

    fn ordinal(&self, column: &str) -> Option<usize> {
        self.plan.ordinal(column)
    }

    fn advance(&mut self) -> bool {
        if self.next < self.rows.len() {
            self.position = Some(self.next);
            self.next += 1;
            true
        } else {
            self.position = None;
            false
        }
    }

    fn value(&self, index: usize) -> SqlValue<'static> {
        match self.position {
            Some(row) => self.rows[row][index].clone(),
            None => SqlValue::Null(crate::value::SqlType::Text),
        }
    }
}
