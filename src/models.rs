use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;

/// Path id meaning "no known path". Never stored on a non-global record.
pub const NO_PATH: i64 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRecord {
    pub id: i64,
    pub canonical_path: String,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    #[serde(flatten)]
    pub group: Group,
    pub path_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPathLink {
    pub id: i64,
    pub group_id: i64,
    pub path_id: i64,
}

/// Who the caller is, derived from its working directory. Request-scoped; never cache it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeContext {
    pub path_id: i64,
    pub group_id: Option<i64>,
    pub group_path_ids: BTreeSet<i64>,
    pub include_global: bool,
}

impl ScopeContext {
    /// Context for a caller whose location is unknown: only global data is reachable.
    pub fn degraded() -> Self {
        Self {
            path_id: NO_PATH,
            group_id: None,
            group_path_ids: BTreeSet::new(),
            include_global: true,
        }
    }

    pub fn has_path(&self) -> bool {
        self.path_id > NO_PATH
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeKeyword {
    Personal,
    Group,
    Global,
    All,
}

impl ScopeKeyword {
    /// Empty input means `All`; anything unrecognized narrows to `Global`.
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim();
        if value.is_empty() {
            return Self::All;
        }
        match value.to_ascii_lowercase().as_str() {
            "personal" => Self::Personal,
            "group" => Self::Group,
            "all" => Self::All,
            _ => Self::Global,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Group => "group",
            Self::Global => "global",
            Self::All => "all",
        }
    }
}

impl<'de> Deserialize<'de> for ScopeKeyword {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Self::parse(raw.as_deref().unwrap_or_default()))
    }
}

/// Concrete visibility predicate. Fields are private so `include_non_global` can only be
/// true together with a non-empty `path_ids`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityFilter {
    include_global: bool,
    include_non_global: bool,
    path_ids: BTreeSet<i64>,
}

impl VisibilityFilter {
    pub fn new(include_global: bool, path_ids: BTreeSet<i64>) -> Self {
        let path_ids: BTreeSet<i64> = path_ids.into_iter().filter(|id| *id > NO_PATH).collect();
        Self {
            include_global,
            include_non_global: !path_ids.is_empty(),
            path_ids,
        }
    }

    pub fn global_only() -> Self {
        Self::new(true, BTreeSet::new())
    }

    pub fn nothing() -> Self {
        Self::new(false, BTreeSet::new())
    }

    pub fn include_global(&self) -> bool {
        self.include_global
    }

    pub fn include_non_global(&self) -> bool {
        self.include_non_global
    }

    pub fn path_ids(&self) -> &BTreeSet<i64> {
        &self.path_ids
    }

    pub fn matches_nothing(&self) -> bool {
        !self.include_global && !self.include_non_global
    }

    pub fn describe(&self) -> String {
        match (self.include_global, self.include_non_global) {
            (false, false) => "none".to_string(),
            (true, false) => "global-only".to_string(),
            (false, true) if self.path_ids.len() == 1 => "personal".to_string(),
            (false, true) => format!("group({} paths)", self.path_ids.len()),
            (true, true) => format!("global+{} paths", self.path_ids.len()),
        }
    }
}

/// Field-level update: `Absent` leaves the stored value alone, `Set` overwrites it.
/// Nullable columns use `Patch<Option<T>>` so `Set(None)` clears instead of skipping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Absent,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Self::Set(value) => Some(value),
            Self::Absent => None,
        }
    }
}

impl<T> From<T> for Patch<T> {
    fn from(value: T) -> Self {
        Self::Set(value)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Patch::Set)
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Set(value) => value.serialize(serializer),
            Self::Absent => serializer.serialize_none(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Active,
    Completed,
    Archived,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoPriority {
    Low,
    Medium,
    High,
}

impl TodoPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub global: bool,
    pub path_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateMemory {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub global: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMemory {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub title: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub content: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub tags: Patch<Vec<String>>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub global: Patch<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: PlanStatus,
    pub global: bool,
    pub path_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreatePlan {
    pub title: String,
    pub description: String,
    pub status: Option<PlanStatus>,
    pub global: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlan {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub title: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub description: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub global: Patch<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: TodoStatus,
    pub priority: TodoPriority,
    pub plan_id: Option<i64>,
    pub global: bool,
    pub path_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateTodo {
    pub title: String,
    pub description: String,
    pub priority: Option<TodoPriority>,
    pub plan_id: Option<i64>,
    pub global: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTodo {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub title: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub description: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub priority: Patch<TodoPriority>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub plan_id: Patch<Option<i64>>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub global: Patch<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListMemoriesQuery {
    pub search: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListPlansQuery {
    pub status: Option<PlanStatus>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListTodosQuery {
    pub status: Option<TodoStatus>,
    pub plan_id: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl BatchResult {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::{Patch, ScopeKeyword, UpdateTodo, VisibilityFilter};
    use std::collections::BTreeSet;

    #[test]
    fn scope_keyword_parse_never_widens_unknown_input() {
        assert_eq!(ScopeKeyword::parse(""), ScopeKeyword::All);
        assert_eq!(ScopeKeyword::parse("   "), ScopeKeyword::All);
        assert_eq!(ScopeKeyword::parse(" Personal "), ScopeKeyword::Personal);
        assert_eq!(ScopeKeyword::parse("GROUP"), ScopeKeyword::Group);
        assert_eq!(ScopeKeyword::parse("all"), ScopeKeyword::All);
        assert_eq!(ScopeKeyword::parse("global"), ScopeKeyword::Global);
        assert_eq!(ScopeKeyword::parse("everything"), ScopeKeyword::Global);
        assert_eq!(ScopeKeyword::parse("*"), ScopeKeyword::Global);
    }

    #[test]
    fn scope_keyword_deserializes_through_parse() {
        let decode = |value: serde_json::Value| -> ScopeKeyword {
            serde_json::from_value(value).expect("keyword")
        };
        assert_eq!(decode(serde_json::json!("Group")), ScopeKeyword::Group);
        assert_eq!(decode(serde_json::json!("everyone")), ScopeKeyword::Global);
        assert_eq!(decode(serde_json::json!("")), ScopeKeyword::All);
        assert_eq!(decode(serde_json::Value::Null), ScopeKeyword::All);
        assert_eq!(serde_json::to_value(ScopeKeyword::Personal).expect("encode"), "personal");
    }

    #[test]
    fn filter_drops_zero_path_ids() {
        let filter = VisibilityFilter::new(false, BTreeSet::from([0]));
        assert!(!filter.include_non_global());
        assert!(filter.matches_nothing());
        assert_eq!(filter.describe(), "none");
    }

    #[test]
    fn patch_distinguishes_absent_from_null() {
        let absent: UpdateTodo = serde_json::from_value(serde_json::json!({"id": 7})).expect("absent");
        assert!(absent.plan_id.is_absent());

        let cleared: UpdateTodo =
            serde_json::from_value(serde_json::json!({"id": 7, "planId": null})).expect("cleared");
        assert_eq!(cleared.plan_id, Patch::Set(None));

        let set: UpdateTodo =
            serde_json::from_value(serde_json::json!({"id": 7, "planId": 3, "title": "x"})).expect("set");
        assert_eq!(set.plan_id, Patch::Set(Some(3)));
        assert_eq!(set.title, Patch::Set("x".to_string()));

        let encoded = serde_json::to_value(&absent).expect("encode");
        assert_eq!(encoded, serde_json::json!({"id": 7}));
    }
}
