mod memories;
mod plans;
mod todos;

pub use memories::MemoryStore;
pub use plans::PlanStore;
pub use todos::TodoStore;

use crate::errors::{EngineError, EngineResult};
use crate::models::{ScopeContext, VisibilityFilter};
use crate::visibility::ScopePredicate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;

/// Where a new record lands: `(global, path_id)`. Global records keep the creator's path
/// for audit only; private records need a resolved path.
pub(crate) fn record_owner(ctx: &ScopeContext, global: bool) -> EngineResult<(bool, i64)> {
    if global {
        return Ok((true, ctx.path_id));
    }
    if !ctx.has_path() {
        return Err(EngineError::validation(
            "global",
            "must be true when the working directory is unknown",
        ));
    }
    Ok((false, ctx.path_id))
}

/// Columns to write for a `global` patch. Turning a global record private rebinds it to the
/// caller's path; the stored path of a global record is audit data and never scopes it.
pub(crate) fn global_columns(
    ctx: &ScopeContext,
    was_global: bool,
    global: bool,
) -> EngineResult<Vec<(&'static str, Value)>> {
    if !was_global || global {
        return Ok(vec![("global", flag(global))]);
    }
    if !ctx.has_path() {
        return Err(EngineError::validation(
            "global",
            "cannot be cleared when the working directory is unknown",
        ));
    }
    Ok(vec![("global", flag(false)), ("path_id", Value::Integer(ctx.path_id))])
}

pub(crate) fn require_text(field: &str, value: &str) -> EngineResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(field, "required"));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn list_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

pub(crate) fn no_fields() -> EngineError {
    EngineError::validation("update", "has no fields to apply")
}

/// One visible row by id, or `None` when it is missing or outside the filter.
pub(crate) fn visible_row<T, F>(
    conn: &Connection,
    table: &str,
    columns: &str,
    filter: &VisibilityFilter,
    id: i64,
    parse: F,
) -> EngineResult<Option<T>>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let predicate = ScopePredicate::from_filter(filter);
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ? AND {}",
        columns,
        table,
        predicate.clause()
    );
    let mut params = vec![Value::Integer(id)];
    params.extend_from_slice(predicate.params());
    conn.query_row(&sql, params_from_iter(params), parse)
        .optional()
        .map_err(EngineError::from)
}

pub(crate) fn row_by_id<T, F>(conn: &Connection, table: &str, columns: &str, id: i64, parse: F) -> EngineResult<T>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let sql = format!("SELECT {} FROM {} WHERE id = ?1", columns, table);
    Ok(conn.query_row(&sql, [id], parse)?)
}

/// Extra `AND` condition for a listing, with its own positional parameters.
pub(crate) struct Condition {
    pub clause: String,
    pub params: Vec<Value>,
}

impl Condition {
    pub fn new(clause: &str, params: Vec<Value>) -> Self {
        Self {
            clause: clause.to_string(),
            params,
        }
    }
}

pub(crate) fn list_rows<T, F>(
    conn: &Connection,
    table: &str,
    columns: &str,
    filter: &VisibilityFilter,
    conditions: Vec<Condition>,
    limit: Option<u32>,
    parse: F,
) -> EngineResult<Vec<T>>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let predicate = ScopePredicate::from_filter(filter);
    let mut clauses = vec![predicate.clause().to_string()];
    let mut params = predicate.params().to_vec();
    for condition in conditions {
        clauses.push(format!("({})", condition.clause));
        params.extend(condition.params);
    }
    params.push(Value::Integer(i64::from(list_limit(limit))));

    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY id DESC LIMIT ?",
        columns,
        table,
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), parse)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Writes only the listed columns. Callers check visibility before calling.
pub(crate) fn update_columns(
    conn: &Connection,
    table: &str,
    id: i64,
    sets: Vec<(&'static str, Value)>,
) -> EngineResult<usize> {
    let assignments = sets
        .iter()
        .map(|(column, _)| format!("{} = ?", column))
        .collect::<Vec<_>>()
        .join(", ");
    let mut params: Vec<Value> = sets.into_iter().map(|(_, value)| value).collect();
    params.push(Value::Integer(id));

    let sql = format!("UPDATE {} SET {} WHERE id = ?", table, assignments);
    Ok(conn.execute(&sql, params_from_iter(params))?)
}

pub(crate) fn delete_visible(
    conn: &Connection,
    table: &str,
    entity: &'static str,
    filter: &VisibilityFilter,
    id: i64,
) -> EngineResult<()> {
    let predicate = ScopePredicate::from_filter(filter);
    let sql = format!("DELETE FROM {} WHERE id = ? AND {}", table, predicate.clause());
    let mut params = vec![Value::Integer(id)];
    params.extend_from_slice(predicate.params());

    let removed = conn.execute(&sql, params_from_iter(params))?;
    if removed == 0 {
        return Err(EngineError::RecordNotFound { entity, id });
    }
    Ok(())
}

pub(crate) fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub(crate) fn flag(value: bool) -> Value {
    Value::Integer(i64::from(value))
}

pub(crate) fn optional_integer(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}
