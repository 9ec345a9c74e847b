//! Error types for bulk insert operations.

use thiserror::Error;

/// Main error type for bulk insert operations.
#[derive(Error, Debug)]
pub enum BulkCopyError {
    /// Malformed or inconsistent column-mapping metadata (empty mapping set,
    /// mismatched table names across types, unknown column). Raised before
    /// any row is read; never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No bulk insert provider registered for the context's connection kind.
    #[error("No bulk insert provider registered for connection kind '{0}'. \
             Register one with ProviderRegistry::register().")]
    ProviderNotFound(String),

    /// PostgreSQL connection, transaction, or COPY error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// SQL Server connection, transaction, or bulk load error.
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// IO error (socket operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bulk load failed for a specific destination table.
    #[error("Bulk load failed for table {table}: {message}")]
    Load { table: String, message: String },
}

impl BulkCopyError {
    /// Create a Load error carrying the destination table for context.
    pub fn load(table: impl Into<String>, message: impl Into<String>) -> Self {
        BulkCopyError::Load {
            table: table.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for bulk insert operations.
pub type Result<T> = std::result::Result<T, BulkCopyError>;
