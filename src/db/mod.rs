use crate::errors::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// SQLite handle with one writer and one read-only connection. The writer mutex serializes
/// writers; every write runs in an IMMEDIATE transaction so the check-then-insert sequences
/// above it are atomic. Under WAL the reader sees the last committed state and is never
/// blocked by an open write transaction.
#[derive(Debug)]
pub struct Database {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> EngineResult<Self> {
        Self::with_busy_timeout(path, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
    }

    pub fn with_busy_timeout(path: &Path, busy_timeout: Duration) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let writer = Connection::open(path)?;
        writer.busy_timeout(busy_timeout)?;
        let journal_mode: String =
            writer.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        writer.execute_batch("PRAGMA foreign_keys = ON;")?;
        writer.execute_batch(SCHEMA_SQL)?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(busy_timeout)?;
        tracing::debug!(path = %path.display(), journal_mode = %journal_mode, "database opened");

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Runs `f` on the read-only connection. Writes attempted here fail.
    pub fn read<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Connection) -> EngineResult<T>,
    {
        let conn = lock(&self.reader)?;
        f(&conn)
    }

    /// Runs `f` inside one write transaction. Any error rolls the whole unit back.
    pub fn write<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> EngineResult<T>,
    {
        let mut conn = lock(&self.writer)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn lock(conn: &Mutex<Connection>) -> EngineResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| EngineError::Storage("database mutex poisoned".to_string()))
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

pub(crate) fn parse_optional_time(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|value| parse_time(&value)).transpose()
}

pub(crate) fn invalid_column(raw: &str, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Unknown {} '{}'", what, raw),
        )),
    )
}

pub(crate) fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::{is_unique_violation, Database};
    use crate::errors::EngineError;

    #[test]
    fn schema_applies_idempotently() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("test.db");
        {
            let _db = Database::new(&db_path).expect("first open");
        }
        let db = Database::new(&db_path).expect("second open");
        let tables: i64 = db
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table'
                     AND name IN ('paths', 'path_groups', 'group_paths', 'memories', 'plans', 'todos')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .expect("count tables");
        assert_eq!(tables, 6);
    }

    #[test]
    fn failed_write_rolls_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        let result: Result<(), EngineError> = db.write(|tx| {
            tx.execute(
                "INSERT INTO paths (id, canonical_path, last_seen_at) VALUES (1, '/tmp/a', '2024-01-01T00:00:00Z')",
                [],
            )?;
            Err(EngineError::Storage("boom".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .read(|conn| Ok(conn.query_row("SELECT COUNT(1) FROM paths", [], |row| row.get(0))?))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn reads_see_committed_state_while_a_write_is_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let count = |db: &Database| -> i64 {
            db.read(|conn| Ok(conn.query_row("SELECT COUNT(1) FROM paths", [], |row| row.get(0))?))
                .expect("count")
        };

        let inside: i64 = db
            .write(|tx| {
                tx.execute(
                    "INSERT INTO paths (id, canonical_path, last_seen_at) VALUES (1, '/tmp/a', '2024-01-01T00:00:00Z')",
                    [],
                )?;
                Ok(count(&db))
            })
            .expect("write");
        assert_eq!(inside, 0);
        assert_eq!(count(&db), 1);
    }

    #[test]
    fn read_connection_rejects_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let result = db.read(|conn| {
            conn.execute(
                "INSERT INTO paths (id, canonical_path, last_seen_at) VALUES (1, '/tmp/a', '2024-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn only_unique_constraints_count_as_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let insert_path = |id: i64| {
            db.write(|tx| {
                Ok(tx.execute(
                    "INSERT INTO paths (id, canonical_path, last_seen_at) VALUES (?1, '/tmp/a', '2024-01-01T00:00:00Z')",
                    [id],
                ))
            })
            .expect("write")
        };
        insert_path(1).expect("first insert");
        let duplicate = insert_path(2).expect_err("duplicate path");
        assert!(is_unique_violation(&duplicate));

        let scopeless = db
            .write(|tx| {
                Ok(tx.execute(
                    "INSERT INTO memories (id, title, content, global, path_id, created_at, updated_at)
                     VALUES (1, 't', 'c', 0, 0, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
                    [],
                ))
            })
            .expect("write")
            .expect_err("check constraint");
        assert!(!is_unique_violation(&scopeless));
    }

    #[test]
    fn schema_rejects_scopeless_private_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let result = db.write(|tx| {
            tx.execute(
                "INSERT INTO memories (id, title, content, global, path_id, created_at, updated_at)
                 VALUES (1, 't', 'c', 0, 0, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        });
        assert!(result.is_err());
    }
}
