use crate::errors::{EngineError, EngineResult};
use crate::snowflake::MAX_NODE_ID;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const ENV_DATABASE: &str = "NOTESCOPE_DB";
const ENV_LOG_DIR: &str = "NOTESCOPE_LOG_DIR";
const ENV_NODE_ID: &str = "NOTESCOPE_NODE_ID";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    pub database_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
    pub node_id: Option<u16>,
    pub busy_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join("notescope.db"),
            log_dir: None,
            log_level: "info".to_string(),
            node_id: None,
            busy_timeout_ms: 5_000,
        }
    }
}

impl EngineSettings {
    pub fn from_yaml_str(raw: &str) -> EngineResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Self = serde_yaml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads a YAML settings file. A missing file yields the defaults.
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn with_env_overrides(mut self) -> EngineResult<Self> {
        if let Ok(value) = std::env::var(ENV_DATABASE) {
            if !value.trim().is_empty() {
                self.database_path = PathBuf::from(value);
            }
        }
        if let Ok(value) = std::env::var(ENV_LOG_DIR) {
            if !value.trim().is_empty() {
                self.log_dir = Some(PathBuf::from(value));
            }
        }
        if let Ok(value) = std::env::var(ENV_NODE_ID) {
            let node_id = value.trim().parse::<u16>().map_err(|error| {
                EngineError::Config(format!("{} must be an integer: {}", ENV_NODE_ID, error))
            })?;
            self.node_id = Some(node_id);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if let Some(node_id) = self.node_id {
            if node_id > MAX_NODE_ID {
                return Err(EngineError::Config(format!(
                    "nodeId {} exceeds maximum {}",
                    node_id, MAX_NODE_ID
                )));
            }
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(EngineError::Config("databasePath must not be empty".to_string()));
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(unix)]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".notescope");
        }
    }

    #[cfg(windows)]
    {
        if let Ok(home) = std::env::var("USERPROFILE") {
            return PathBuf::from(home).join(".notescope");
        }
    }

    PathBuf::from(".notescope")
}
