//! Relational storage behind a narrow trait
//!
//! The writer only needs five operations from a database: run a statement,
//! run one statement for many rows, fetch results, check for a table and
//! reopen a dropped connection. [`SqliteStorage`] is the bundled backend;
//! tests script their own.

pub mod sqlite;

pub use sqlite::SqliteStorage;

use thiserror::Error;
use tweetsql_common::Row;

use crate::retry::{FailureKind, Retryable};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Lost connection to the database: {0}")]
    ConnectionLost(String),

    #[error("Database operation timed out: {0}")]
    TimedOut(String),

    #[error("Row has {actual} values but the statement expects {expected}")]
    Arity { expected: usize, actual: usize },

    #[error("Database error: {0}")]
    Database(String),
}

impl StorageError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, StorageError::ConnectionLost(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StorageError::TimedOut(_))
    }
}

impl Retryable for StorageError {
    fn failure_kind(&self) -> FailureKind {
        if self.is_connection_lost() {
            FailureKind::ConnectionLost
        } else if self.is_timeout() {
            FailureKind::TimedOut
        } else {
            FailureKind::Other
        }
    }
}

pub trait Storage {
    /// Run one statement; returns the number of affected rows.
    fn execute(&mut self, sql: &str) -> Result<u64, StorageError>;

    /// Run one parameterised statement for every row, atomically.
    fn execute_many(&mut self, sql: &str, rows: &[Row]) -> Result<u64, StorageError>;

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, StorageError>;

    fn table_exists(&mut self, table: &str) -> Result<bool, StorageError>;

    /// Replace the underlying connection.
    fn reconnect(&mut self) -> Result<(), StorageError>;
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn execute(&mut self, sql: &str) -> Result<u64, StorageError> {
        (**self).execute(sql)
    }

    fn execute_many(&mut self, sql: &str, rows: &[Row]) -> Result<u64, StorageError> {
        (**self).execute_many(sql, rows)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, StorageError> {
        (**self).query(sql)
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, StorageError> {
        (**self).table_exists(table)
    }

    fn reconnect(&mut self) -> Result<(), StorageError> {
        (**self).reconnect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Insert,
    /// Overwrite rows sharing a primary key.
    Replace,
}

impl WriteMode {
    pub fn verb(self) -> &'static str {
        match self {
            WriteMode::Insert => "INSERT",
            WriteMode::Replace => "REPLACE",
        }
    }
}

/// `INSERT INTO t (a, b) VALUES (?, ?)` or the `REPLACE` equivalent.
pub fn write_statement(mode: WriteMode, table: &str, columns: &[&str]) -> String {
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "{} INTO {} ({}) VALUES ({})",
        mode.verb(),
        table,
        columns.join(", "),
        placeholders
    )
}

pub fn drop_statement(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", table)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_write_statement() {
        assert_eq!(
            write_statement(WriteMode::Insert, "tweets", &["message_id", "message"]),
            "INSERT INTO tweets (message_id, message) VALUES (?, ?)"
        );
        assert_eq!(
            write_statement(WriteMode::Replace, "tweets_2014_01", &["message_id"]),
            "REPLACE INTO tweets_2014_01 (message_id) VALUES (?)"
        );
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            StorageError::ConnectionLost("gone away".into()).failure_kind(),
            FailureKind::ConnectionLost
        );
        assert_eq!(StorageError::TimedOut("busy".into()).failure_kind(), FailureKind::TimedOut);
        assert_eq!(StorageError::Database("syntax".into()).failure_kind(), FailureKind::Other);
    }
}
