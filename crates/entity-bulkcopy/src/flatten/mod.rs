//! Entity-to-row flattening.
//!
//! A [`RowCursor`] presents a heterogeneous stream of entities as a flat,
//! forward-only table: one unified column index shared by every concrete
//! type in the hierarchy, nulls for the columns a given row's type does
//! not map. Providers consume cursors without knowing whether the rows
//! are computed lazily ([`MappedRowCursor`]) or buffered up front
//! ([`EntityTable`]).

mod cursor;
mod plan;
mod table;

pub use cursor::MappedRowCursor;
pub use plan::{ColumnBinding, ColumnPlan};
pub use table::EntityTable;

use crate::value::SqlValue;

/// Forward-only tabular view over a set of entities.
///
/// The cursor starts positioned before the first row; [`advance`] moves
/// it forward and reports whether a row is available. Column indexes are
/// stable across rows regardless of each row's concrete type.
///
/// [`advance`]: RowCursor::advance
pub trait RowCursor: Send {
    /// Destination schema name.
    fn schema(&self) -> &str;

    /// Destination table name (unqualified).
    fn table(&self) -> &str;

    /// Number of column slots, including reserved identity slots.
    fn field_count(&self) -> usize;

    /// Writable source-to-destination column pairs, in column-index order.
    ///
    /// Identity columns appear here only when the cursor was built with
    /// keep-identity; they always occupy a slot in [`field_count`]
    /// regardless.
    ///
    /// [`field_count`]: RowCursor::field_count
    fn column_mappings(&self) -> &[ColumnBinding];

    /// Index of a column by destination name, if mapped.
    fn ordinal(&self, column: &str) -> Option<usize>;

    /// Move to the next row. Returns `false` once the stream is exhausted.
    fn advance(&mut self) -> bool;

    /// Value at `index` for the current row.
    ///
    /// Columns the current row's type does not map come back as typed
    /// nulls, as do navigation chains broken by a null link.
    fn value(&self, index: usize) -> SqlValue<'static>;
}
