mod batch;
mod db;
mod errors;
mod groups;
mod models;
mod paths;
mod scope;
mod settings;
mod snowflake;
mod store;
mod visibility;

pub use crate::batch::{check_batch_size, BatchOp, MAX_BATCH_SIZE};
pub use crate::db::Database;
pub use crate::errors::{EngineError, EngineResult};
pub use crate::groups::GroupRegistry;
pub use crate::models::{
    BatchResult, CreateMemory, CreatePlan, CreateTodo, Group, GroupPathLink, GroupSummary,
    ListMemoriesQuery, ListPlansQuery, ListTodosQuery, Memory, Patch, PathRecord, Plan, PlanStatus,
    ScopeContext, ScopeKeyword, Todo, TodoPriority, TodoStatus, UpdateMemory, UpdatePlan, UpdateTodo,
    VisibilityFilter, NO_PATH,
};
pub use crate::paths::{normalize_path, PathRegistry};
pub use crate::scope::{build_filter, build_filter_for, ScopeResolver};
pub use crate::settings::EngineSettings;
pub use crate::snowflake::{IdGenerator, MAX_NODE_ID};
pub use crate::store::{MemoryStore, PlanStore, TodoStore};
pub use crate::visibility::ScopePredicate;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Every registry and store wired to one database and one id generator.
#[derive(Debug, Clone)]
pub struct Engine {
    db: Arc<Database>,
    ids: Arc<IdGenerator>,
    pub paths: PathRegistry,
    pub groups: GroupRegistry,
    pub scope: ScopeResolver,
    pub memories: MemoryStore,
    pub plans: PlanStore,
    pub todos: TodoStore,
}

impl Engine {
    /// Opens the database and, when `log_dir` is set, installs file logging at `log_level`.
    pub fn open(settings: &EngineSettings) -> EngineResult<Self> {
        settings.validate()?;
        if let Some(log_dir) = &settings.log_dir {
            init_tracing(log_dir, &settings.log_level)?;
        }
        let db = Database::with_busy_timeout(
            &settings.database_path,
            Duration::from_millis(settings.busy_timeout_ms),
        )?;
        let ids = match settings.node_id {
            Some(node_id) => IdGenerator::new(node_id)?,
            None => IdGenerator::from_machine(),
        };
        tracing::info!(
            database = %settings.database_path.display(),
            node_id = ids.node_id(),
            "engine opened"
        );
        Ok(Self::from_parts(Arc::new(db), Arc::new(ids)))
    }

    pub fn from_parts(db: Arc<Database>, ids: Arc<IdGenerator>) -> Self {
        Self {
            paths: PathRegistry::new(Arc::clone(&db), Arc::clone(&ids)),
            groups: GroupRegistry::new(Arc::clone(&db), Arc::clone(&ids)),
            scope: ScopeResolver::new(Arc::clone(&db), Arc::clone(&ids)),
            memories: MemoryStore::new(Arc::clone(&db), Arc::clone(&ids)),
            plans: PlanStore::new(Arc::clone(&db), Arc::clone(&ids)),
            todos: TodoStore::new(Arc::clone(&db), Arc::clone(&ids)),
            db,
            ids,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn id_generator(&self) -> &IdGenerator {
        &self.ids
    }

    /// Resolves `working_directory` and builds the filter for `keyword` in one call.
    pub fn visibility(&self, keyword: &str, working_directory: &str) -> (ScopeContext, VisibilityFilter) {
        let ctx = self.scope.resolve(working_directory);
        let filter = build_filter_for(keyword, &ctx);
        tracing::debug!(keyword, filter = %filter.describe(), "visibility built");
        (ctx, filter)
    }
}

/// JSON logs to a daily-rolled file under `log_dir`. `RUST_LOG` wins over `level`.
/// Later calls are no-ops.
pub fn init_tracing(log_dir: &Path, level: &str) -> EngineResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "notescope.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    if LOG_GUARD.set(guard).is_err() {
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| EngineError::Config(format!("tracing init failed: {}", error)))
}
