use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("DUPLICATE_NAME: group '{0}' already exists")]
    DuplicateName(String),
    #[error("PATH_ALREADY_IN_GROUP: {path} already belongs to group '{group}'")]
    PathAlreadyInGroup { group: String, path: String },
    #[error("GROUP_NOT_FOUND: {0}")]
    GroupNotFound(String),
    #[error("PATH_NOT_FOUND: {0}")]
    PathNotFound(String),
    #[error("RECORD_NOT_FOUND: {entity} {id}")]
    RecordNotFound { entity: &'static str, id: i64 },
    #[error("EMPTY_BATCH: at least one item is required")]
    EmptyBatch,
    #[error("BATCH_TOO_LARGE: {size} items exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },
    #[error("VALIDATION_FAILED: {field} {reason}")]
    ValidationFailed { field: String, reason: String },
    #[error("STORAGE_FAILURE: {0}")]
    Storage(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
}

impl EngineError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Business failures that a batch records against a single item instead of aborting.
    pub fn is_item_failure(&self) -> bool {
        matches!(self, Self::ValidationFailed { .. } | Self::RecordNotFound { .. })
    }

    /// Message without the kind prefix, used for per-item batch errors.
    pub fn item_message(&self) -> String {
        match self {
            Self::ValidationFailed { field, reason } => format!("{} {}", field, reason),
            Self::RecordNotFound { entity, id } => format!("{} {} not found", entity, id),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(value: serde_json::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::EngineError;

    #[test]
    fn item_messages_drop_the_kind_prefix() {
        let invalid = EngineError::validation("title", "required");
        assert_eq!(invalid.item_message(), "title required");
        assert!(invalid.to_string().starts_with("VALIDATION_FAILED"));

        let missing = EngineError::RecordNotFound { entity: "todo", id: 42 };
        assert_eq!(missing.item_message(), "todo 42 not found");
        assert!(missing.is_item_failure());
    }

    #[test]
    fn storage_errors_are_not_item_failures() {
        let error = EngineError::from(rusqlite::Error::InvalidQuery);
        assert!(!error.is_item_failure());
        assert!(error.to_string().starts_with("STORAGE_FAILURE"));
    }
}
