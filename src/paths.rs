use crate::db::{now, parse_time, Database};
use crate::errors::{EngineError, EngineResult};
use crate::models::PathRecord;
use crate::snowflake::IdGenerator;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PathRegistry {
    db: Arc<Database>,
    ids: Arc<IdGenerator>,
}

impl PathRegistry {
    pub fn new(db: Arc<Database>, ids: Arc<IdGenerator>) -> Self {
        Self { db, ids }
    }

    /// Insert-or-touch. Repeated calls for the same directory return the same id.
    pub fn ensure(&self, raw_path: &str) -> EngineResult<PathRecord> {
        self.db.write(|tx| ensure_path(tx, &self.ids, raw_path))
    }

    pub fn exists(&self, raw_path: &str) -> EngineResult<bool> {
        Ok(self.find_by_path(raw_path)?.is_some())
    }

    pub fn find_by_path(&self, raw_path: &str) -> EngineResult<Option<PathRecord>> {
        let canonical = normalize_path(raw_path);
        self.db.read(|conn| find_path(conn, &canonical))
    }

    pub fn get(&self, path_id: i64) -> EngineResult<Option<PathRecord>> {
        self.db.read(|conn| {
            conn.query_row(
                "SELECT id, canonical_path, last_seen_at FROM paths WHERE id = ?1",
                [path_id],
                parse_path_row,
            )
            .optional()
            .map_err(EngineError::from)
        })
    }

    pub fn list(&self) -> EngineResult<Vec<PathRecord>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, canonical_path, last_seen_at FROM paths ORDER BY last_seen_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([], parse_path_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Forgets a path and its group membership. Records bound to it are left in place.
    pub fn delete(&self, raw_path: &str) -> EngineResult<bool> {
        let canonical = normalize_path(raw_path);
        let removed = self.db.write(|tx| {
            Ok(tx.execute("DELETE FROM paths WHERE canonical_path = ?1", [&canonical])?)
        })?;
        if removed > 0 {
            tracing::debug!(path = %canonical, "path forgotten");
        }
        Ok(removed > 0)
    }
}

pub(crate) fn ensure_path(conn: &Connection, ids: &IdGenerator, raw_path: &str) -> EngineResult<PathRecord> {
    let canonical = normalize_path(raw_path);
    if canonical.trim().is_empty() {
        return Err(EngineError::validation("path", "required"));
    }

    conn.execute(
        "INSERT INTO paths (id, canonical_path, last_seen_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(canonical_path) DO UPDATE SET last_seen_at = excluded.last_seen_at",
        params![ids.next_id()?, canonical, now().to_rfc3339()],
    )?;

    find_path(conn, &canonical)?.ok_or(EngineError::PathNotFound(canonical))
}

pub(crate) fn find_path(conn: &Connection, canonical: &str) -> EngineResult<Option<PathRecord>> {
    conn.query_row(
        "SELECT id, canonical_path, last_seen_at FROM paths WHERE canonical_path = ?1",
        [canonical],
        parse_path_row,
    )
    .optional()
    .map_err(EngineError::from)
}

fn parse_path_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PathRecord> {
    Ok(PathRecord {
        id: row.get(0)?,
        canonical_path: row.get(1)?,
        last_seen_at: parse_time(&row.get::<_, String>(2)?)?,
    })
}

/// Absolute canonical form of a directory. Existing paths are resolved through the
/// filesystem (symlinks included); missing ones are cleaned lexically. When neither works
/// the trimmed input is returned unchanged.
pub fn normalize_path(raw_path: &str) -> String {
    let trimmed = raw_path.trim();
    if trimmed.is_empty() {
        return trimmed.to_string();
    }

    let candidate = Path::new(trimmed);
    let absolute = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(candidate),
            Err(_) => return trimmed.to_string(),
        }
    };

    let resolved = absolute
        .canonicalize()
        .unwrap_or_else(|_| lexical_clean(&absolute));
    match resolved.to_str() {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => trimmed.to_string(),
    }
}

fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}
