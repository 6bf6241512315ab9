use super::{
    delete_visible, global_columns, list_rows, no_fields, record_owner, require_text, row_by_id, text,
    update_columns, visible_row, Condition,
};
use crate::batch::{self, BatchOp};
use crate::db::{invalid_column, now, parse_optional_time, parse_time, Database};
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    BatchResult, CreatePlan, ListPlansQuery, Patch, Plan, PlanStatus, ScopeContext, UpdatePlan,
    VisibilityFilter,
};
use crate::snowflake::IdGenerator;
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use std::sync::Arc;

const TABLE: &str = "plans";
const ENTITY: &str = "plan";
const COLUMNS: &str =
    "id, title, description, status, global, path_id, created_at, updated_at, completed_at";

#[derive(Debug, Clone)]
pub struct PlanStore {
    db: Arc<Database>,
    ids: Arc<IdGenerator>,
}

impl PlanStore {
    pub fn new(db: Arc<Database>, ids: Arc<IdGenerator>) -> Self {
        Self { db, ids }
    }

    pub fn create(&self, ctx: &ScopeContext, input: CreatePlan) -> EngineResult<Plan> {
        self.db.write(|tx| create_plan(tx, &self.ids, ctx, input))
    }

    pub fn get(&self, filter: &VisibilityFilter, id: i64) -> EngineResult<Option<Plan>> {
        self.db
            .read(|conn| visible_row(conn, TABLE, COLUMNS, filter, id, parse_plan_row))
    }

    pub fn list(&self, filter: &VisibilityFilter, query: &ListPlansQuery) -> EngineResult<Vec<Plan>> {
        let mut conditions = Vec::new();
        if let Some(status) = query.status {
            conditions.push(Condition::new("status = ?", vec![text(status.as_str())]));
        }
        self.db.read(|conn| {
            list_rows(conn, TABLE, COLUMNS, filter, conditions, query.limit, parse_plan_row)
        })
    }

    /// `ctx` is the caller's scope; a record made private is bound to its path.
    pub fn update(&self, ctx: &ScopeContext, filter: &VisibilityFilter, item: UpdatePlan) -> EngineResult<Plan> {
        self.db.write(|tx| update_plan(tx, ctx, filter, item))
    }

    pub fn set_status(&self, filter: &VisibilityFilter, id: i64, status: PlanStatus) -> EngineResult<Plan> {
        self.db.write(|tx| set_plan_status(tx, filter, id, status))
    }

    pub fn complete(&self, filter: &VisibilityFilter, id: i64) -> EngineResult<Plan> {
        self.set_status(filter, id, PlanStatus::Completed)
    }

    /// Deleting a plan detaches its todos; they are kept.
    pub fn delete(&self, filter: &VisibilityFilter, id: i64) -> EngineResult<()> {
        self.db.write(|tx| delete_plan(tx, filter, id))
    }

    pub fn batch_create(&self, ctx: &ScopeContext, items: Vec<CreatePlan>) -> EngineResult<BatchResult> {
        batch::execute(&self.db, ENTITY, BatchOp::Create, items, |tx, item| {
            create_plan(tx, &self.ids, ctx, item).map(|_| ())
        })
    }

    pub fn batch_update(
        &self,
        ctx: &ScopeContext,
        filter: &VisibilityFilter,
        items: Vec<UpdatePlan>,
    ) -> EngineResult<BatchResult> {
        batch::execute(&self.db, ENTITY, BatchOp::Update, items, |tx, item| {
            update_plan(tx, ctx, filter, item).map(|_| ())
        })
    }

    pub fn batch_set_status(
        &self,
        filter: &VisibilityFilter,
        ids: Vec<i64>,
        status: PlanStatus,
    ) -> EngineResult<BatchResult> {
        batch::execute(&self.db, ENTITY, BatchOp::SetStatus, ids, |tx, id| {
            set_plan_status(tx, filter, id, status).map(|_| ())
        })
    }

    pub fn batch_complete(&self, filter: &VisibilityFilter, ids: Vec<i64>) -> EngineResult<BatchResult> {
        self.batch_set_status(filter, ids, PlanStatus::Completed)
    }

    pub fn batch_delete(&self, filter: &VisibilityFilter, ids: Vec<i64>) -> EngineResult<BatchResult> {
        batch::execute(&self.db, ENTITY, BatchOp::Delete, ids, |tx, id| {
            delete_plan(tx, filter, id)
        })
    }
}

fn create_plan(conn: &Connection, ids: &IdGenerator, ctx: &ScopeContext, input: CreatePlan) -> EngineResult<Plan> {
    let title = require_text("title", &input.title)?;
    let (global, path_id) = record_owner(ctx, input.global)?;
    let status = input.status.unwrap_or(PlanStatus::Draft);
    let created_at = now();

    let plan = Plan {
        id: ids.next_id()?,
        title,
        description: input.description.trim().to_string(),
        status,
        global,
        path_id,
        created_at,
        updated_at: created_at,
        completed_at: (status == PlanStatus::Completed).then_some(created_at),
    };
    conn.execute(
        "INSERT INTO plans (id, title, description, status, global, path_id, created_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)",
        params![
            plan.id,
            plan.title,
            plan.description,
            plan.status.as_str(),
            plan.global,
            plan.path_id,
            plan.created_at.to_rfc3339(),
            plan.completed_at.map(|value| value.to_rfc3339()),
        ],
    )?;
    Ok(plan)
}

fn update_plan(
    conn: &Connection,
    ctx: &ScopeContext,
    filter: &VisibilityFilter,
    item: UpdatePlan,
) -> EngineResult<Plan> {
    let current = require_visible(conn, filter, item.id)?;

    let mut sets: Vec<(&'static str, Value)> = Vec::new();
    if let Patch::Set(title) = &item.title {
        sets.push(("title", text(require_text("title", title)?)));
    }
    if let Patch::Set(description) = &item.description {
        sets.push(("description", text(description.trim())));
    }
    if let Patch::Set(global) = item.global {
        sets.extend(global_columns(ctx, current.global, global)?);
    }
    if sets.is_empty() {
        return Err(no_fields());
    }
    sets.push(("updated_at", text(now().to_rfc3339())));

    update_columns(conn, TABLE, current.id, sets)?;
    row_by_id(conn, TABLE, COLUMNS, current.id, parse_plan_row)
}

fn set_plan_status(conn: &Connection, filter: &VisibilityFilter, id: i64, status: PlanStatus) -> EngineResult<Plan> {
    let current = require_visible(conn, filter, id)?;
    let stamp = now();
    let completed_at = match status {
        PlanStatus::Completed => Some(current.completed_at.unwrap_or(stamp)),
        _ => None,
    };

    conn.execute(
        "UPDATE plans SET status = ?1, completed_at = ?2, updated_at = ?3 WHERE id = ?4",
        params![
            status.as_str(),
            completed_at.map(|value| value.to_rfc3339()),
            stamp.to_rfc3339(),
            id
        ],
    )?;
    Ok(Plan {
        status,
        completed_at,
        updated_at: stamp,
        ..current
    })
}

fn delete_plan(conn: &Connection, filter: &VisibilityFilter, id: i64) -> EngineResult<()> {
    delete_visible(conn, TABLE, ENTITY, filter, id)?;
    conn.execute("UPDATE todos SET plan_id = NULL WHERE plan_id = ?1", [id])?;
    Ok(())
}

fn require_visible(conn: &Connection, filter: &VisibilityFilter, id: i64) -> EngineResult<Plan> {
    visible_row(conn, TABLE, COLUMNS, filter, id, parse_plan_row)?
        .ok_or(EngineError::RecordNotFound { entity: ENTITY, id })
}

fn parse_plan_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Plan> {
    Ok(Plan {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: parse_plan_status(&row.get::<_, String>(3)?)?,
        global: row.get(4)?,
        path_id: row.get(5)?,
        created_at: parse_time(&row.get::<_, String>(6)?)?,
        updated_at: parse_time(&row.get::<_, String>(7)?)?,
        completed_at: parse_optional_time(row.get(8)?)?,
    })
}

fn parse_plan_status(raw: &str) -> rusqlite::Result<PlanStatus> {
    match raw {
        "draft" => Ok(PlanStatus::Draft),
        "active" => Ok(PlanStatus::Active),
        "completed" => Ok(PlanStatus::Completed),
        "archived" => Ok(PlanStatus::Archived),
        other => Err(invalid_column(other, "plan status")),
    }
}
