use super::{
    delete_visible, global_columns, list_rows, no_fields, optional_integer, record_owner, require_text,
    row_by_id, text, update_columns, visible_row, Condition,
};
use crate::batch::{self, BatchOp};
use crate::db::{invalid_column, now, parse_optional_time, parse_time, Database};
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    BatchResult, CreateTodo, ListTodosQuery, Patch, ScopeContext, ScopeKeyword, Todo, TodoPriority,
    TodoStatus, UpdateTodo, VisibilityFilter,
};
use crate::scope::build_filter;
use crate::snowflake::IdGenerator;
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use std::sync::Arc;

const TABLE: &str = "todos";
const ENTITY: &str = "todo";
const COLUMNS: &str = "id, title, description, status, priority, plan_id, global, path_id, created_at, updated_at, completed_at";

#[derive(Debug, Clone)]
pub struct TodoStore {
    db: Arc<Database>,
    ids: Arc<IdGenerator>,
}

impl TodoStore {
    pub fn new(db: Arc<Database>, ids: Arc<IdGenerator>) -> Self {
        Self { db, ids }
    }

    pub fn create(&self, ctx: &ScopeContext, input: CreateTodo) -> EngineResult<Todo> {
        self.db.write(|tx| create_todo(tx, &self.ids, ctx, input))
    }

    pub fn get(&self, filter: &VisibilityFilter, id: i64) -> EngineResult<Option<Todo>> {
        self.db
            .read(|conn| visible_row(conn, TABLE, COLUMNS, filter, id, parse_todo_row))
    }

    pub fn list(&self, filter: &VisibilityFilter, query: &ListTodosQuery) -> EngineResult<Vec<Todo>> {
        let mut conditions = Vec::new();
        if let Some(status) = query.status {
            conditions.push(Condition::new("status = ?", vec![text(status.as_str())]));
        }
        if let Some(plan_id) = query.plan_id {
            conditions.push(Condition::new("plan_id = ?", vec![Value::Integer(plan_id)]));
        }
        self.db.read(|conn| {
            list_rows(conn, TABLE, COLUMNS, filter, conditions, query.limit, parse_todo_row)
        })
    }

    /// `ctx` is the caller's scope; a record made private is bound to its path.
    pub fn update(&self, ctx: &ScopeContext, filter: &VisibilityFilter, item: UpdateTodo) -> EngineResult<Todo> {
        self.db.write(|tx| update_todo(tx, ctx, filter, item))
    }

    pub fn set_status(&self, filter: &VisibilityFilter, id: i64, status: TodoStatus) -> EngineResult<Todo> {
        self.db.write(|tx| set_todo_status(tx, filter, id, status))
    }

    pub fn complete(&self, filter: &VisibilityFilter, id: i64) -> EngineResult<Todo> {
        self.set_status(filter, id, TodoStatus::Completed)
    }

    pub fn delete(&self, filter: &VisibilityFilter, id: i64) -> EngineResult<()> {
        self.db.write(|tx| delete_visible(tx, TABLE, ENTITY, filter, id))
    }

    pub fn batch_create(&self, ctx: &ScopeContext, items: Vec<CreateTodo>) -> EngineResult<BatchResult> {
        batch::execute(&self.db, ENTITY, BatchOp::Create, items, |tx, item| {
            create_todo(tx, &self.ids, ctx, item).map(|_| ())
        })
    }

    pub fn batch_update(
        &self,
        ctx: &ScopeContext,
        filter: &VisibilityFilter,
        items: Vec<UpdateTodo>,
    ) -> EngineResult<BatchResult> {
        batch::execute(&self.db, ENTITY, BatchOp::Update, items, |tx, item| {
            update_todo(tx, ctx, filter, item).map(|_| ())
        })
    }

    pub fn batch_set_status(
        &self,
        filter: &VisibilityFilter,
        ids: Vec<i64>,
        status: TodoStatus,
    ) -> EngineResult<BatchResult> {
        batch::execute(&self.db, ENTITY, BatchOp::SetStatus, ids, |tx, id| {
            set_todo_status(tx, filter, id, status).map(|_| ())
        })
    }

    pub fn batch_complete(&self, filter: &VisibilityFilter, ids: Vec<i64>) -> EngineResult<BatchResult> {
        self.batch_set_status(filter, ids, TodoStatus::Completed)
    }

    pub fn batch_delete(&self, filter: &VisibilityFilter, ids: Vec<i64>) -> EngineResult<BatchResult> {
        batch::execute(&self.db, ENTITY, BatchOp::Delete, ids, |tx, id| {
            delete_visible(tx, TABLE, ENTITY, filter, id)
        })
    }
}

fn create_todo(conn: &Connection, ids: &IdGenerator, ctx: &ScopeContext, input: CreateTodo) -> EngineResult<Todo> {
    let title = require_text("title", &input.title)?;
    let (global, path_id) = record_owner(ctx, input.global)?;
    if let Some(plan_id) = input.plan_id {
        require_plan(conn, &build_filter(ScopeKeyword::All, ctx), plan_id)?;
    }
    let created_at = now();

    let todo = Todo {
        id: ids.next_id()?,
        title,
        description: input.description.trim().to_string(),
        status: TodoStatus::Pending,
        priority: input.priority.unwrap_or(TodoPriority::Medium),
        plan_id: input.plan_id,
        global,
        path_id,
        created_at,
        updated_at: created_at,
        completed_at: None,
    };
    conn.execute(
        "INSERT INTO todos (id, title, description, status, priority, plan_id, global, path_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            todo.id,
            todo.title,
            todo.description,
            todo.status.as_str(),
            todo.priority.as_str(),
            todo.plan_id,
            todo.global,
            todo.path_id,
            todo.created_at.to_rfc3339(),
        ],
    )?;
    Ok(todo)
}

fn update_todo(
    conn: &Connection,
    ctx: &ScopeContext,
    filter: &VisibilityFilter,
    item: UpdateTodo,
) -> EngineResult<Todo> {
    let current = require_visible(conn, filter, item.id)?;

    let mut sets: Vec<(&'static str, Value)> = Vec::new();
    if let Patch::Set(title) = &item.title {
        sets.push(("title", text(require_text("title", title)?)));
    }
    if let Patch::Set(description) = &item.description {
        sets.push(("description", text(description.trim())));
    }
    if let Patch::Set(priority) = item.priority {
        sets.push(("priority", text(priority.as_str())));
    }
    if let Patch::Set(plan_id) = item.plan_id {
        if let Some(plan_id) = plan_id {
            require_plan(conn, filter, plan_id)?;
        }
        sets.push(("plan_id", optional_integer(plan_id)));
    }
    if let Patch::Set(global) = item.global {
        sets.extend(global_columns(ctx, current.global, global)?);
    }
    if sets.is_empty() {
        return Err(no_fields());
    }
    sets.push(("updated_at", text(now().to_rfc3339())));

    update_columns(conn, TABLE, current.id, sets)?;
    row_by_id(conn, TABLE, COLUMNS, current.id, parse_todo_row)
}

fn set_todo_status(conn: &Connection, filter: &VisibilityFilter, id: i64, status: TodoStatus) -> EngineResult<Todo> {
    let current = require_visible(conn, filter, id)?;
    let stamp = now();
    let completed_at = match status {
        TodoStatus::Completed => Some(current.completed_at.unwrap_or(stamp)),
        _ => None,
    };

    conn.execute(
        "UPDATE todos SET status = ?1, completed_at = ?2, updated_at = ?3 WHERE id = ?4",
        params![
            status.as_str(),
            completed_at.map(|value| value.to_rfc3339()),
            stamp.to_rfc3339(),
            id
        ],
    )?;
    Ok(Todo {
        status,
        completed_at,
        updated_at: stamp,
        ..current
    })
}

fn require_visible(conn: &Connection, filter: &VisibilityFilter, id: i64) -> EngineResult<Todo> {
    visible_row(conn, TABLE, COLUMNS, filter, id, parse_todo_row)?
        .ok_or(EngineError::RecordNotFound { entity: ENTITY, id })
}

fn require_plan(conn: &Connection, filter: &VisibilityFilter, plan_id: i64) -> EngineResult<()> {
    let found: Option<i64> = visible_row(conn, "plans", "id", filter, plan_id, |row| row.get(0))?;
    match found {
        Some(_) => Ok(()),
        None => Err(EngineError::validation("planId", format!("{} does not match a visible plan", plan_id))),
    }
}

fn parse_todo_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Todo> {
    Ok(Todo {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: parse_todo_status(&row.get::<_, String>(3)?)?,
        priority: parse_priority(&row.get::<_, String>(4)?)?,
        plan_id: row.get(5)?,
        global: row.get(6)?,
        path_id: row.get(7)?,
        created_at: parse_time(&row.get::<_, String>(8)?)?,
        updated_at: parse_time(&row.get::<_, String>(9)?)?,
        completed_at: parse_optional_time(row.get(10)?)?,
    })
}

fn parse_todo_status(raw: &str) -> rusqlite::Result<TodoStatus> {
    match raw {
        "pending" => Ok(TodoStatus::Pending),
        "in_progress" => Ok(TodoStatus::InProgress),
        "completed" => Ok(TodoStatus::Completed),
        "cancelled" => Ok(TodoStatus::Cancelled),
        other => Err(invalid_column(other, "todo status")),
    }
}

fn parse_priority(raw: &str) -> rusqlite::Result<TodoPriority> {
    match raw {
        "low" => Ok(TodoPriority::Low),
        "medium" => Ok(TodoPriority::Medium),
        "high" => Ok(TodoPriority::High),
        other => Err(invalid_column(other, "todo priority")),
    }
}
