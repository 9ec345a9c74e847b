use crate::entity::Entity;
use crate::error::Result;
use crate::flatten::plan::{ColumnBinding, ColumnPlan};
use crate::flatten::RowCursor;
use crate::metadata::TypeColumnSet;
use crate::value::SqlValue;

/// Streaming row cursor over an entity iterator.
///
/// Rows are flattened on demand as the consumer advances; the source
/// collection is never buffered, so memory stays flat regardless of
/// batch size.
pub struct MappedRowCursor<I: Iterator> {
    plan: ColumnPlan,
    entities: I,
    current: Option<I::Item>,
}

impl<I, E> MappedRowCursor<I>
where
    I: Iterator<Item = E>,
    E: Entity,
{
    /// Build the unified column plan for the hierarchy and wrap the
    /// entity iterator.
    pub fn new(entities: I, column_sets: &[&TypeColumnSet], keep_identity: bool) -> Result<Self> {
        let plan = ColumnPlan::build(column_sets, keep_identity)?;
        Ok(Self::with_plan(entities, plan))
    }

    pub(crate) fn with_plan(entities: I, plan: ColumnPlan) -> Self {
        Self {
            plan,
            entities,
            current: None,
        }
    }
}

impl<I, E> RowCursor for MappedRowCursor<I>
where
    I: Iterator<Item = E> + Send,
    E: Entity + Send,
{
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
        self.current = self.entities.next();
        self.current.is_some()
    }

    fn value(&self, index: usize) -> SqlValue<'static> {
        match &self.current {
            Some(entity) => self.plan.value_for(entity, index),
            None => SqlValue::Null(crate::value::SqlType::Text),
        }
    }
}
