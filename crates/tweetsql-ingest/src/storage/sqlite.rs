//! SQLite backend
//!
//! Accepts the MySQL-flavoured declarations the default schema uses
//! (`bigint(20)`, `varchar(128)`, `datetime`) through SQLite's type affinity,
//! and understands `REPLACE INTO` natively.

use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use tweetsql_common::{Cell, Row};

use super::{Storage, StorageError};

/// How long SQLite waits on a locked database before reporting a timeout.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Memory,
    File(PathBuf),
}

#[derive(Debug)]
pub struct SqliteStorage {
    target: Target,
    conn: Connection,
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        let message = err.to_string();
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                StorageError::TimedOut(message)
            },
            Some(ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::SystemIoFailure) => {
                StorageError::ConnectionLost(message)
            },
            _ => StorageError::Database(message),
        }
    }
}

fn to_value(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Int(v) => Value::Integer(*v),
        Cell::Float(v) => Value::Real(*v),
        Cell::Text(s) => Value::Text(s.clone()),
    }
}

fn to_cell(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(v) => Cell::Int(v),
        ValueRef::Real(v) => Cell::Float(v),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Cell::Text(String::from_utf8_lossy(bytes).into_owned())
        },
    }
}

fn connect(target: &Target) -> Result<Connection, StorageError> {
    let conn = match target {
        Target::Memory => Connection::open_in_memory(),
        Target::File(path) => Connection::open(path),
    }
    .map_err(|e| StorageError::ConnectionLost(e.to_string()))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn preview(sql: &str) -> String {
    sql.chars().take(200).collect()
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let target = Target::File(path.as_ref().to_path_buf());
        let conn = connect(&target)?;
        debug!(path = %path.as_ref().display(), "Opened SQLite database");
        Ok(Self { target, conn })
    }

    /// A private in-memory database. Reconnecting starts from an empty one.
    pub fn in_memory() -> Result<Self, StorageError> {
        let target = Target::Memory;
        let conn = connect(&target)?;
        Ok(Self { target, conn })
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.target {
            Target::File(path) => Some(path),
            Target::Memory => None,
        }
    }
}

impl Storage for SqliteStorage {
    fn execute(&mut self, sql: &str) -> Result<u64, StorageError> {
        debug!(sql = %preview(sql), "SQL");
        let changed = self.conn.execute(sql, [])?;
        Ok(changed as u64)
    }

    fn execute_many(&mut self, sql: &str, rows: &[Row]) -> Result<u64, StorageError> {
        debug!(sql = %preview(sql), rows = rows.len(), "SQL");
        let tx = self.conn.transaction()?;
        let mut changed = 0u64;
        {
            let mut stmt = tx.prepare(sql)?;
            let expected = stmt.parameter_count();
            for row in rows {
                if row.len() != expected {
                    return Err(StorageError::Arity {
                        expected,
                        actual: row.len(),
                    });
                }
                changed += stmt.execute(params_from_iter(row.cells().iter().map(to_value)))? as u64;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, StorageError> {
        debug!(sql = %preview(sql), "SQL");
        let mut stmt = self.conn.prepare(sql)?;
        let width = stmt.column_count();
        let mut rows = stmt.query([])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                cells.push(to_cell(row.get_ref(i)?));
            }
            out.push(Row::new(cells));
        }
        Ok(out)
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn reconnect(&mut self) -> Result<(), StorageError> {
        debug!(target_db = ?self.target, "Reconnecting to SQLite");
        self.conn = connect(&self.target)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::{write_statement, WriteMode};

    fn row(id: i64, text: &str) -> Row {
        Row::new(vec![Cell::Int(id), Cell::from(text)])
    }

    fn storage() -> SqliteStorage {
        let mut storage = SqliteStorage::in_memory().unwrap();
        storage
            .execute("CREATE TABLE t (message_id bigint(20) primary key, message text)")
            .unwrap();
        storage
    }

    #[test]
    fn test_insert_and_query() {
        let mut storage = storage();
        let sql = write_statement(WriteMode::Insert, "t", &["message_id", "message"]);
        assert_eq!(storage.execute_many(&sql, &[row(1, "a"), row(2, "b")]).unwrap(), 2);

        let rows = storage.query("SELECT message_id, message FROM t ORDER BY message_id").unwrap();
        assert_eq!(rows, vec![row(1, "a"), row(2, "b")]);
    }

    #[test]
    fn test_duplicate_insert_rolls_back_batch() {
        let mut storage = storage();
        let sql = write_statement(WriteMode::Insert, "t", &["message_id", "message"]);
        storage.execute_many(&sql, &[row(1, "a")]).unwrap();

        let err = storage.execute_many(&sql, &[row(2, "b"), row(1, "dup")]).unwrap_err();
        assert!(matches!(err, StorageError::Database(_)));
        assert_eq!(storage.query("SELECT count(*) FROM t").unwrap()[0].get(0), Some(&Cell::Int(1)));
    }

    #[test]
    fn test_arity_is_checked() {
        let mut storage = storage();
        let sql = write_statement(WriteMode::Insert, "t", &["message_id", "message"]);
        let err = storage.execute_many(&sql, &[Row::new(vec![Cell::Int(1)])]).unwrap_err();
        assert_eq!(err, StorageError::Arity { expected: 2, actual: 1 });
    }

    #[test]
    fn test_table_exists() {
        let mut storage = storage();
        assert!(storage.table_exists("t").unwrap());
        assert!(!storage.table_exists("t_2014_01").unwrap());
    }

    #[test]
    fn test_file_database_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = SqliteStorage::open(dir.path().join("tweets.db")).unwrap();
        storage.execute("CREATE TABLE t (message_id bigint(20) primary key)").unwrap();
        storage.reconnect().unwrap();
        assert!(storage.table_exists("t").unwrap());
    }
}
