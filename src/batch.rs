use crate::db::Database;
use crate::errors::{EngineError, EngineResult};
use crate::models::BatchResult;
use rusqlite::Transaction;

pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp {
    Create,
    Update,
    SetStatus,
    Delete,
}

impl BatchOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::SetStatus => "set_status",
            Self::Delete => "delete",
        }
    }
}

pub fn check_batch_size(len: usize) -> EngineResult<()> {
    if len == 0 {
        return Err(EngineError::EmptyBatch);
    }
    if len > MAX_BATCH_SIZE {
        return Err(EngineError::BatchTooLarge {
            size: len,
            max: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}

/// Applies `apply` to every item, in order, inside one transaction.
///
/// Item failures (validation, missing rows) are recorded against the item's 1-based
/// position and the batch carries on. Any other error aborts and rolls back everything.
pub fn execute<I, F>(
    db: &Database,
    entity: &'static str,
    op: BatchOp,
    items: Vec<I>,
    mut apply: F,
) -> EngineResult<BatchResult>
where
    F: FnMut(&Transaction<'_>, I) -> EngineResult<()>,
{
    check_batch_size(items.len())?;

    let result = db.write(|tx| {
        let mut result = BatchResult {
            total: items.len(),
            ..BatchResult::default()
        };
        for (index, item) in items.into_iter().enumerate() {
            match apply(tx, item) {
                Ok(()) => result.succeeded += 1,
                Err(error) if error.is_item_failure() => {
                    result.failed += 1;
                    result
                        .errors
                        .push(format!("item {}: {}", index + 1, error.item_message()));
                }
                Err(error) => return Err(error),
            }
        }
        Ok(result)
    });

    match &result {
        Ok(summary) => tracing::info!(
            entity,
            op = op.as_str(),
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "batch applied"
        ),
        Err(error) => tracing::warn!(entity, op = op.as_str(), error = %error, "batch aborted"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::{check_batch_size, execute, BatchOp, MAX_BATCH_SIZE};
    use crate::db::Database;
    use crate::errors::EngineError;

    fn database(dir: &tempfile::TempDir) -> Database {
        Database::new(&dir.path().join("test.db")).expect("db")
    }

    fn path_count(db: &Database) -> i64 {
        db.read(|conn| Ok(conn.query_row("SELECT COUNT(1) FROM paths", [], |row| row.get(0))?))
            .expect("count")
    }

    #[test]
    fn size_policy_is_checked_first() {
        assert!(matches!(check_batch_size(0), Err(EngineError::EmptyBatch)));
        assert!(check_batch_size(MAX_BATCH_SIZE).is_ok());
        assert!(matches!(
            check_batch_size(MAX_BATCH_SIZE + 1),
            Err(EngineError::BatchTooLarge { size: 101, max: 100 })
        ));
    }

    #[test]
    fn item_failures_are_counted_not_raised() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = database(&dir);
        let items = vec!["/a", "", "/c", ""];

        let result = execute(&db, "path", BatchOp::Create, items, |tx, raw| {
            if raw.is_empty() {
                return Err(EngineError::validation("path", "required"));
            }
            tx.execute(
                "INSERT INTO paths (canonical_path, last_seen_at) VALUES (?1, '2024-01-01T00:00:00Z')",
                [raw],
            )?;
            Ok(())
        })
        .expect("batch");

        assert_eq!(result.total, 4);
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 2);
        assert_eq!(result.total, result.succeeded + result.failed);
        assert_eq!(
            result.errors,
            vec!["item 2: path required".to_string(), "item 4: path required".to_string()]
        );
        assert_eq!(path_count(&db), 2);
    }

    #[test]
    fn infrastructure_failure_rolls_back_every_item() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = database(&dir);
        let items = vec!["/a", "/b", "/c"];

        let result = execute(&db, "path", BatchOp::Create, items, |tx, raw| {
            if raw == "/c" {
                return Err(EngineError::Storage("connection lost".to_string()));
            }
            tx.execute(
                "INSERT INTO paths (canonical_path, last_seen_at) VALUES (?1, '2024-01-01T00:00:00Z')",
                [raw],
            )?;
            Ok(())
        });

        assert!(matches!(result, Err(EngineError::Storage(_))));
        assert_eq!(path_count(&db), 0);
    }

    #[test]
    fn oversized_batch_touches_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = database(&dir);
        let items: Vec<String> = (0..=MAX_BATCH_SIZE).map(|i| format!("/p{}", i)).collect();
        let mut calls = 0;

        let result = execute(&db, "path", BatchOp::Create, items, |_, _| {
            calls += 1;
            Ok(())
        });
        assert!(matches!(result, Err(EngineError::BatchTooLarge { .. })));
        assert_eq!(calls, 0);
    }
}
