use crate::db::{is_unique_violation, now, parse_time, Database};
use crate::errors::{EngineError, EngineResult};
use crate::models::{Group, GroupPathLink, GroupSummary, PathRecord};
use crate::paths::{ensure_path, find_path, normalize_path};
use crate::snowflake::IdGenerator;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Named sets of paths that share their private records. A path belongs to at most one group.
#[derive(Debug, Clone)]
pub struct GroupRegistry {
    db: Arc<Database>,
    ids: Arc<IdGenerator>,
}

impl GroupRegistry {
    pub fn new(db: Arc<Database>, ids: Arc<IdGenerator>) -> Self {
        Self { db, ids }
    }

    pub fn create_group(&self, name: &str, description: &str) -> EngineResult<Group> {
        let name = require_name(name)?;
        let group = self.db.write(|tx| {
            ensure_name_free(tx, &name, None)?;
            let group = Group {
                id: self.ids.next_id()?,
                name: name.clone(),
                description: description.trim().to_string(),
                created_at: now(),
            };
            tx.execute(
                "INSERT INTO path_groups (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![group.id, group.name, group.description, group.created_at.to_rfc3339()],
            )
            .map_err(|error| duplicate_or_storage(error, &name))?;
            Ok(group)
        })?;
        tracing::debug!(group_id = group.id, name = %group.name, "group created");
        Ok(group)
    }

    pub fn rename_group(&self, group_id: i64, new_name: &str) -> EngineResult<Group> {
        let name = require_name(new_name)?;
        self.db.write(|tx| {
            let mut group = require_group(tx, group_id)?;
            if group.name == name {
                return Ok(group);
            }
            ensure_name_free(tx, &name, Some(group_id))?;
            tx.execute(
                "UPDATE path_groups SET name = ?1 WHERE id = ?2",
                params![name, group_id],
            )
            .map_err(|error| duplicate_or_storage(error, &name))?;
            tracing::debug!(group_id, from = %group.name, to = %name, "group renamed");
            group.name = name.clone();
            Ok(group)
        })
    }

    pub fn update_description(&self, group_id: i64, description: &str) -> EngineResult<Group> {
        self.db.write(|tx| {
            let mut group = require_group(tx, group_id)?;
            group.description = description.trim().to_string();
            tx.execute(
                "UPDATE path_groups SET description = ?1 WHERE id = ?2",
                params![group.description, group_id],
            )?;
            Ok(group)
        })
    }

    pub fn get_group(&self, group_id: i64) -> EngineResult<Option<Group>> {
        self.db.read(|conn| find_group(conn, group_id))
    }

    pub fn find_group_by_name(&self, name: &str) -> EngineResult<Option<Group>> {
        let name = name.trim().to_string();
        self.db.read(|conn| {
            conn.query_row(
                "SELECT id, name, description, created_at FROM path_groups WHERE name = ?1",
                [&name],
                parse_group_row,
            )
            .optional()
            .map_err(EngineError::from)
        })
    }

    pub fn list_groups(&self) -> EngineResult<Vec<GroupSummary>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name, g.description, g.created_at, COUNT(gp.id)
                 FROM path_groups g
                 LEFT JOIN group_paths gp ON gp.group_id = g.id
                 GROUP BY g.id
                 ORDER BY g.name ASC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(GroupSummary {
                        group: parse_group_row(row)?,
                        path_count: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_group_paths(&self, group_id: i64) -> EngineResult<Vec<PathRecord>> {
        self.db.read(|conn| {
            require_group(conn, group_id)?;
            let mut stmt = conn.prepare(
                "SELECT p.id, p.canonical_path, p.last_seen_at
                 FROM group_paths gp
                 JOIN paths p ON p.id = gp.path_id
                 WHERE gp.group_id = ?1
                 ORDER BY p.canonical_path ASC",
            )?;
            let rows = stmt
                .query_map([group_id], |row| {
                    Ok(PathRecord {
                        id: row.get(0)?,
                        canonical_path: row.get(1)?,
                        last_seen_at: parse_time(&row.get::<_, String>(2)?)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Adds a path to a group. Re-adding to the same group is a no-op; a path owned by
    /// another group is rejected and nothing is written.
    pub fn add_path(&self, group_id: i64, raw_path: &str) -> EngineResult<GroupPathLink> {
        self.db.write(|tx| {
            let group = require_group(tx, group_id)?;
            let path = ensure_path(tx, &self.ids, raw_path)?;

            if let Some(existing) = find_link(tx, path.id)? {
                if existing.group_id == group.id {
                    return Ok(existing);
                }
                return Err(path_conflict(tx, existing.group_id, &path.canonical_path)?);
            }

            let link = GroupPathLink {
                id: self.ids.next_id()?,
                group_id: group.id,
                path_id: path.id,
            };
            match tx.execute(
                "INSERT INTO group_paths (id, group_id, path_id) VALUES (?1, ?2, ?3)",
                params![link.id, link.group_id, link.path_id],
            ) {
                Ok(_) => {}
                Err(error) if is_unique_violation(&error) => {
                    return match find_link(tx, path.id)? {
                        Some(owner) => Err(path_conflict(tx, owner.group_id, &path.canonical_path)?),
                        None => Err(error.into()),
                    };
                }
                Err(error) => return Err(error.into()),
            }
            tracing::debug!(group = %group.name, path = %path.canonical_path, "path added to group");
            Ok(link)
        })
    }

    /// Returns whether a link was removed. A path that was never in the group is not an error.
    pub fn remove_path(&self, group_id: i64, raw_path: &str) -> EngineResult<bool> {
        let canonical = normalize_path(raw_path);
        self.db.write(|tx| {
            let group = require_group(tx, group_id)?;
            let Some(path) = find_path(tx, &canonical)? else {
                return Ok(false);
            };
            let removed = tx.execute(
                "DELETE FROM group_paths WHERE group_id = ?1 AND path_id = ?2",
                params![group.id, path.id],
            )?;
            if removed > 0 {
                tracing::debug!(group = %group.name, path = %path.canonical_path, "path removed from group");
            }
            Ok(removed > 0)
        })
    }

    pub fn find_group_by_path(&self, raw_path: &str) -> EngineResult<Option<Group>> {
        let canonical = normalize_path(raw_path);
        self.db.read(|conn| {
            conn.query_row(
                "SELECT g.id, g.name, g.description, g.created_at
                 FROM paths p
                 JOIN group_paths gp ON gp.path_id = p.id
                 JOIN path_groups g ON g.id = gp.group_id
                 WHERE p.canonical_path = ?1",
                [&canonical],
                parse_group_row,
            )
            .optional()
            .map_err(EngineError::from)
        })
    }

    /// Drops the group and its memberships. Records bound to member paths are untouched.
    pub fn delete_group(&self, group_id: i64) -> EngineResult<()> {
        self.db.write(|tx| {
            let group = require_group(tx, group_id)?;
            let unlinked = tx.execute("DELETE FROM group_paths WHERE group_id = ?1", [group_id])?;
            tx.execute("DELETE FROM path_groups WHERE id = ?1", [group_id])?;
            tracing::debug!(group = %group.name, unlinked, "group deleted");
            Ok(())
        })
    }
}

pub(crate) fn group_for_path_id(conn: &Connection, path_id: i64) -> EngineResult<Option<Group>> {
    conn.query_row(
        "SELECT g.id, g.name, g.description, g.created_at
         FROM group_paths gp
         JOIN path_groups g ON g.id = gp.group_id
         WHERE gp.path_id = ?1",
        [path_id],
        parse_group_row,
    )
    .optional()
    .map_err(EngineError::from)
}

pub(crate) fn group_path_ids(conn: &Connection, group_id: i64) -> EngineResult<BTreeSet<i64>> {
    let mut stmt = conn.prepare("SELECT path_id FROM group_paths WHERE group_id = ?1")?;
    let ids = stmt
        .query_map([group_id], |row| row.get::<_, i64>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(ids)
}

fn find_group(conn: &Connection, group_id: i64) -> EngineResult<Option<Group>> {
    conn.query_row(
        "SELECT id, name, description, created_at FROM path_groups WHERE id = ?1",
        [group_id],
        parse_group_row,
    )
    .optional()
    .map_err(EngineError::from)
}

fn require_group(conn: &Connection, group_id: i64) -> EngineResult<Group> {
    find_group(conn, group_id)?.ok_or_else(|| EngineError::GroupNotFound(group_id.to_string()))
}

fn find_link(conn: &Connection, path_id: i64) -> EngineResult<Option<GroupPathLink>> {
    conn.query_row(
        "SELECT id, group_id, path_id FROM group_paths WHERE path_id = ?1",
        [path_id],
        |row| {
            Ok(GroupPathLink {
                id: row.get(0)?,
                group_id: row.get(1)?,
                path_id: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(EngineError::from)
}

fn path_conflict(conn: &Connection, owner_group_id: i64, canonical_path: &str) -> EngineResult<EngineError> {
    let group = find_group(conn, owner_group_id)?
        .map(|group| group.name)
        .unwrap_or_else(|| owner_group_id.to_string());
    Ok(EngineError::PathAlreadyInGroup {
        group,
        path: canonical_path.to_string(),
    })
}

fn ensure_name_free(conn: &Connection, name: &str, except_id: Option<i64>) -> EngineResult<()> {
    let owner: Option<i64> = conn
        .query_row("SELECT id FROM path_groups WHERE name = ?1", [name], |row| row.get(0))
        .optional()?;
    match owner {
        Some(id) if Some(id) != except_id => Err(EngineError::DuplicateName(name.to_string())),
        _ => Ok(()),
    }
}

fn duplicate_or_storage(error: rusqlite::Error, name: &str) -> EngineError {
    if is_unique_violation(&error) {
        EngineError::DuplicateName(name.to_string())
    } else {
        error.into()
    }
}

fn require_name(raw: &str) -> EngineResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(EngineError::validation("name", "required"));
    }
    Ok(name.to_string())
}

fn parse_group_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: parse_time(&row.get::<_, String>(3)?)?,
    })
}
