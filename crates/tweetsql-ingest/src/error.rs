//! Error types for tweetsql ingestion
//!
//! Configuration errors are the only failures that reach the caller as `Err`.
//! Everything raised while talking to the API or the database is retried by
//! the [`crate::retry::RetryController`] and, once the budget is spent,
//! reported through the warning sink instead.

use thiserror::Error;

use crate::source::SourceError;
use crate::storage::StorageError;

/// Result type alias for ingestion setup
pub type Result<T> = std::result::Result<T, IngestError>;

/// Invalid or inconsistent configuration, detected before any I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Table name missing")]
    MissingTable,

    #[error("Invalid table name '{0}': only letters, digits and '_' are allowed")]
    InvalidTableName(String),

    #[error(
        "Mismatch between the number of columns ({columns}) and non-index column declarations ({declarations})"
    )]
    ColumnCountMismatch { columns: usize, declarations: usize },

    #[error("Column list given without column declarations; provide the declarations too")]
    ColumnsWithoutDeclarations,

    #[error("Invalid column declaration '{0}'")]
    InvalidDeclaration(String),

    #[error("Invalid column name '{0}': only letters, digits and '_' are allowed")]
    InvalidColumnName(String),

    #[error("Column '{0}' has no extraction path in the custom extraction map")]
    MissingExtraction(String),

    #[error("Invalid extraction path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Missing Twitter API credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid API keys file: {0}")]
    KeyFile(String),

    #[error("Flush threshold must be greater than 0")]
    ZeroFlushThreshold,

    #[error("Retry budget must allow at least one attempt")]
    ZeroAttempts,
}

/// A raw record that could not be turned into a row.
///
/// These reject a single record; the rest of the batch proceeds.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapError {
    #[error("Record mapped to an all-null row (id: {id})")]
    AllNull { id: String },

    #[error("Cannot extract client name from source field {raw:?}: {reason}")]
    SourceMarkup { raw: String, reason: String },

    #[error("Cannot parse creation time {raw:?}: {reason}")]
    Timestamp { raw: String, reason: String },

    #[error("Malformed coordinates {raw}: {reason}")]
    Coordinates { raw: String, reason: String },
}

/// Top-level error for building and preparing an ingestion pipeline.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] tweetsql_common::CommonError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
