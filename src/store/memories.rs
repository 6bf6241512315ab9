use super::{
    delete_visible, global_columns, list_rows, no_fields, record_owner, require_text, row_by_id, text,
    update_columns, visible_row, Condition,
};
use crate::batch::{self, BatchOp};
use crate::db::{now, parse_time, Database};
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    BatchResult, CreateMemory, ListMemoriesQuery, Memory, Patch, ScopeContext, UpdateMemory,
    VisibilityFilter,
};
use crate::snowflake::IdGenerator;
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use std::sync::Arc;

const TABLE: &str = "memories";
const ENTITY: &str = "memory";
const COLUMNS: &str = "id, title, content, tags_json, global, path_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct MemoryStore {
    db: Arc<Database>,
    ids: Arc<IdGenerator>,
}

impl MemoryStore {
    pub fn new(db: Arc<Database>, ids: Arc<IdGenerator>) -> Self {
        Self { db, ids }
    }

    pub fn create(&self, ctx: &ScopeContext, input: CreateMemory) -> EngineResult<Memory> {
        self.db.write(|tx| create_memory(tx, &self.ids, ctx, input))
    }

    pub fn get(&self, filter: &VisibilityFilter, id: i64) -> EngineResult<Option<Memory>> {
        self.db
            .read(|conn| visible_row(conn, TABLE, COLUMNS, filter, id, parse_memory_row))
    }

    pub fn list(&self, filter: &VisibilityFilter, query: &ListMemoriesQuery) -> EngineResult<Vec<Memory>> {
        let mut conditions = Vec::new();
        if let Some(search) = query.search.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
            let pattern = format!("%{}%", escape_like(search));
            conditions.push(Condition::new(
                "title LIKE ? ESCAPE '\\' OR content LIKE ? ESCAPE '\\'",
                vec![text(pattern.clone()), text(pattern)],
            ));
        }
        self.db.read(|conn| {
            list_rows(conn, TABLE, COLUMNS, filter, conditions, query.limit, parse_memory_row)
        })
    }

    /// `ctx` is the caller's scope; a record made private is bound to its path.
    pub fn update(&self, ctx: &ScopeContext, filter: &VisibilityFilter, item: UpdateMemory) -> EngineResult<Memory> {
        self.db.write(|tx| update_memory(tx, ctx, filter, item))
    }

    pub fn delete(&self, filter: &VisibilityFilter, id: i64) -> EngineResult<()> {
        self.db.write(|tx| delete_visible(tx, TABLE, ENTITY, filter, id))
    }

    pub fn batch_create(&self, ctx: &ScopeContext, items: Vec<CreateMemory>) -> EngineResult<BatchResult> {
        batch::execute(&self.db, ENTITY, BatchOp::Create, items, |tx, item| {
            create_memory(tx, &self.ids, ctx, item).map(|_| ())
        })
    }

    pub fn batch_update(
        &self,
        ctx: &ScopeContext,
        filter: &VisibilityFilter,
        items: Vec<UpdateMemory>,
    ) -> EngineResult<BatchResult> {
        batch::execute(&self.db, ENTITY, BatchOp::Update, items, |tx, item| {
            update_memory(tx, ctx, filter, item).map(|_| ())
        })
    }

    pub fn batch_delete(&self, filter: &VisibilityFilter, ids: Vec<i64>) -> EngineResult<BatchResult> {
        batch::execute(&self.db, ENTITY, BatchOp::Delete, ids, |tx, id| {
            delete_visible(tx, TABLE, ENTITY, filter, id)
        })
    }
}

fn create_memory(
    conn: &Connection,
    ids: &IdGenerator,
    ctx: &ScopeContext,
    input: CreateMemory,
) -> EngineResult<Memory> {
    let title = require_text("title", &input.title)?;
    let content = require_text("content", &input.content)?;
    let (global, path_id) = record_owner(ctx, input.global)?;
    let created_at = now();

    let memory = Memory {
        id: ids.next_id()?,
        title,
        content,
        tags: normalize_tags(input.tags),
        global,
        path_id,
        created_at,
        updated_at: created_at,
    };
    conn.execute(
        "INSERT INTO memories (id, title, content, tags_json, global, path_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            memory.id,
            memory.title,
            memory.content,
            serde_json::to_string(&memory.tags)?,
            memory.global,
            memory.path_id,
            memory.created_at.to_rfc3339(),
        ],
    )?;
    Ok(memory)
}

fn update_memory(
    conn: &Connection,
    ctx: &ScopeContext,
    filter: &VisibilityFilter,
    item: UpdateMemory,
) -> EngineResult<Memory> {
    let current = visible_row(conn, TABLE, COLUMNS, filter, item.id, parse_memory_row)?
        .ok_or(EngineError::RecordNotFound { entity: ENTITY, id: item.id })?;

    let mut sets: Vec<(&'static str, Value)> = Vec::new();
    if let Patch::Set(title) = &item.title {
        sets.push(("title", text(require_text("title", title)?)));
    }
    if let Patch::Set(content) = &item.content {
        sets.push(("content", text(require_text("content", content)?)));
    }
    if let Patch::Set(tags) = item.tags {
        sets.push(("tags_json", text(serde_json::to_string(&normalize_tags(tags))?)));
    }
    if let Patch::Set(global) = item.global {
        sets.extend(global_columns(ctx, current.global, global)?);
    }
    if sets.is_empty() {
        return Err(no_fields());
    }
    sets.push(("updated_at", text(now().to_rfc3339())));

    update_columns(conn, TABLE, current.id, sets)?;
    row_by_id(conn, TABLE, COLUMNS, current.id, parse_memory_row)
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !normalized.iter().any(|existing| existing == tag) {
            normalized.push(tag.to_string());
        }
    }
    normalized
}

/// Escapes `LIKE` wildcards so search text matches literally.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn parse_memory_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let tags_json: String = row.get(3)?;
    Ok(Memory {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        tags: serde_json::from_str(&tags_json).map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(error))
        })?,
        global: row.get(4)?,
        path_id: row.get(5)?,
        created_at: parse_time(&row.get::<_, String>(6)?)?,
        updated_at: parse_time(&row.get::<_, String>(7)?)?,
    })
}
