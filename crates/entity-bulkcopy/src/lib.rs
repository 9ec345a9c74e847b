//! # entity-bulkcopy
//!
//! Transactional bulk inserts for mapped entity collections.
//!
//! Flattens heterogeneous object graphs into tabular rows and streams
//! them to a database over its native bulk channel, with support for:
//!
//! - **Unified column layout** across subtypes sharing one table
//!   (single-table inheritance with discriminator columns)
//! - **Nested property paths** with NULL short-circuiting on broken
//!   navigation links
//! - **Streaming or buffered** row sources behind one cursor protocol
//! - **Provider-owned or caller-owned transactions** with all-or-nothing
//!   semantics
//! - **PostgreSQL binary COPY** and **SQL Server TDS bulk load**
//!   transports
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use entity_bulkcopy::{
//!     bulk_insert, BulkCopyOptions, PgBulkProvider, ProviderRegistry,
//!     DEFAULT_BATCH_SIZE,
//! };
//! # use entity_bulkcopy::{BulkContext, MappingCatalog, MappingProvider};
//! # struct Ctx(MappingCatalog);
//! # impl BulkContext for Ctx {
//! #     fn connection_kind(&self) -> &str { "postgres" }
//! #     fn mappings(&self) -> &dyn MappingProvider { &self.0 }
//! # }
//! # #[derive(Clone)] struct Page;
//! # impl entity_bulkcopy::Fields for Page {
//! #     fn field(&self, _: &str) -> Option<entity_bulkcopy::Field<'_>> { None }
//! # }
//! # impl entity_bulkcopy::Entity for Page {
//! #     fn type_tag(&self) -> &'static str { "Page" }
//! # }
//! # impl entity_bulkcopy::EntityType for Page { const TAG: &'static str = "Page"; }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = ProviderRegistry::new();
//!     registry.register(Arc::new(PgBulkProvider::new(
//!         "host=localhost user=app dbname=wiki",
//!     )));
//!
//!     let pages: Vec<Page> = load_pages();
//!     let context = Ctx(MappingCatalog::new());
//!     let rows = bulk_insert(
//!         &registry,
//!         &context,
//!         pages,
//!         BulkCopyOptions::default(),
//!         DEFAULT_BATCH_SIZE,
//!     )
//!     .await?;
//!     println!("Inserted {} rows", rows);
//!     Ok(())
//! }
//! # fn load_pages() -> Vec<Page> { Vec::new() }
//! ```

pub mod entity;
pub mod error;
pub mod flatten;
pub mod metadata;
pub mod options;
pub mod providers;
pub mod value;

// Re-exports for convenient access
pub use entity::{walk_path, Entity, EntityType, Field, Fields};
pub use error::{BulkCopyError, Result};
pub use flatten::{ColumnBinding, EntityTable, MappedRowCursor, RowCursor};
pub use metadata::{
    column_sets_for, BulkContext, ColumnDescriptor, MappingCatalog, MappingProvider, TypeColumnSet,
};
pub use options::{BulkCopyOptions, DEFAULT_BATCH_SIZE};
pub use providers::{
    bulk_insert, bulk_insert_buffered, bulk_insert_in, BulkInsertProvider, BulkTransaction,
    MssqlBulkProvider, MssqlClient, PgBulkProvider, ProviderRegistry,
};
pub use value::{SqlType, SqlValue};
