//! Bulk insert providers and the registry that routes to them.
//!
//! A [`BulkInsertProvider`] owns the transport for one connection kind:
//! it opens its own connection and transaction for [`run`], or writes
//! into a caller-supplied transaction for [`run_in`]. The
//! [`ProviderRegistry`] maps connection-kind identifiers to providers so
//! composition stays explicit instead of hanging off globals.
//!
//! [`run`]: BulkInsertProvider::run
//! [`run_in`]: BulkInsertProvider::run_in

mod mssql;
mod postgres;

pub use mssql::MssqlBulkProvider;
pub use postgres::PgBulkProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::compat::Compat;
use tracing::debug;

use crate::entity::EntityType;
use crate::error::{BulkCopyError, Result};
use crate::flatten::{EntityTable, MappedRowCursor, RowCursor};
use crate::metadata::{column_sets_for, BulkContext};
use crate::options::BulkCopyOptions;

/// A tiberius client over a tokio TCP stream.
pub type MssqlClient = tiberius::Client<Compat<TcpStream>>;

/// An in-flight transaction a bulk insert can join.
///
/// The variant must match the provider it is handed to; a mismatch is a
/// [`BulkCopyError::Config`] before any row is read.
pub enum BulkTransaction<'a> {
    Postgres(&'a tokio_postgres::Transaction<'a>),
    Mssql(&'a mut MssqlClient),
}

/// Transport for bulk inserts against one kind of database.
#[async_trait]
pub trait BulkInsertProvider: Send + Sync {
    /// Connection-kind identifier this provider serves.
    fn connection_kind(&self) -> &str;

    /// Insert every row of the cursor inside a provider-owned transaction.
    ///
    /// Opens a fresh connection, begins a transaction, streams the rows,
    /// and commits. Any failure rolls back before the error propagates, so
    /// either every row is visible or none is.
    async fn run(
        &self,
        cursor: &mut dyn RowCursor,
        options: BulkCopyOptions,
        batch_size: usize,
    ) -> Result<u64>;

    /// Insert every row of the cursor inside a caller-owned transaction.
    ///
    /// Never commits or rolls back: the rows become part of the caller's
    /// unit of work and share its fate.
    async fn run_in(
        &self,
        transaction: &mut BulkTransaction<'_>,
        cursor: &mut dyn RowCursor,
        options: BulkCopyOptions,
        batch_size: usize,
    ) -> Result<u64>;
}

impl std::fmt::Debug for dyn BulkInsertProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkInsertProvider")
            .field("connection_kind", &self.connection_kind())
            .finish()
    }
}

/// Maps connection-kind identifiers to providers.
///
/// Built once at composition time; lookups are read-only afterwards.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn BulkInsertProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its connection kind. Re-registering a
    /// kind replaces the previous provider.
    pub fn register(&mut self, provider: Arc<dyn BulkInsertProvider>) {
        debug!(kind = provider.connection_kind(), "registering bulk insert provider");
        self.providers
            .insert(provider.connection_kind().to_string(), provider);
    }

    /// Look up the provider for a connection kind.
    pub fn get(&self, kind: &str) -> Result<Arc<dyn BulkInsertProvider>> {
        self.providers
            .get(kind)
            .cloned()
            .ok_or_else(|| BulkCopyError::ProviderNotFound(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.providers.contains_key(kind)
    }

    /// Registered connection kinds, unordered.
    pub fn kinds(&self) -> Vec<&str> {
        self.providers.keys().map(|k| k.as_str()).collect()
    }
}

/// Bulk insert a collection of entities inside a provider-owned
/// transaction, streaming rows as they are flattened.
pub async fn bulk_insert<E, T>(
    registry: &ProviderRegistry,
    context: &dyn BulkContext,
    entities: T,
    options: BulkCopyOptions,
    batch_size: usize,
) -> Result<u64>
where
    E: EntityType + Send,
    T: IntoIterator<Item = E>,
    T::IntoIter: Send,
{
    let provider = registry.get(context.connection_kind())?;
    let sets = column_sets_for(context.mappings(), E::TAG)?;
    let mut cursor =
        MappedRowCursor::new(entities.into_iter(), &sets, options.keep_identity())?;
    provider.run(&mut cursor, options, batch_size).await
}

/// Bulk insert a collection of entities into a caller-owned transaction.
pub async fn bulk_insert_in<E, T>(
    registry: &ProviderRegistry,
    context: &dyn BulkContext,
    transaction: &mut BulkTransaction<'_>,
    entities: T,
    options: BulkCopyOptions,
    batch_size: usize,
) -> Result<u64>
where
    E: EntityType + Send,
    T: IntoIterator<Item = E>,
    T::IntoIter: Send,
{
    let provider = registry.get(context.connection_kind())?;
    let sets = column_sets_for(context.mappings(), E::TAG)?;
    let mut cursor =
        MappedRowCursor::new(entities.into_iter(), &sets, options.keep_identity())?;
    provider
        .run_in(transaction, &mut cursor, options, batch_size)
        .await
}

/// Bulk insert through an eagerly materialized table instead of a
/// streaming cursor. Produces identical rows; trades memory for a source
/// that releases its entities before transport starts.
pub async fn bulk_insert_buffered<E, T>(
    registry: &ProviderRegistry,
    context: &dyn BulkContext,
    entities: T,
    options: BulkCopyOptions,
    batch_size: usize,
) -> Result<u64>
where
    E: EntityType,
    T: IntoIterator<Item = E>,
{
    let provider = registry.get(context.connection_kind())?;
    let sets = column_sets_for(context.mappings(), E::TAG)?;
    let mut table = EntityTable::build(entities, &sets, options.keep_identity())?;
    provider.run(&mut table, options, batch_size).await
}
