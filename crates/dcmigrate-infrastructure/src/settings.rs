//! Runtime settings loaded from `dcmigrate.toml`.

use dcmigrate_core::error::{DcmError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::DcmPaths;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 300;
pub const DEFAULT_MAX_CONNECTION_RETRIES: u32 = 10;

/// Names of the queues whose drain ends a `*_WAIT` stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueNames {
    pub filesystem: String,
    pub final_sync: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            filesystem: "dcmigrate-filesystem".to_string(),
            final_sync: "dcmigrate-final-sync".to_string(),
        }
    }
}

/// Every field has a default, so a missing or partial file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Directory holding `migration.toml`. Defaults to the platform data dir.
    pub state_dir: Option<PathBuf>,
    pub poll_interval_secs: u64,
    pub max_backoff_secs: u64,
    pub max_connection_retries: u32,
    /// Base URL of the queue service. Queue lookups are unavailable without it.
    pub queue_endpoint: Option<String>,
    pub queues: QueueNames,
    /// `tracing_subscriber::EnvFilter` directive. `RUST_LOG` takes precedence.
    pub log_filter: String,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            state_dir: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
            max_connection_retries: DEFAULT_MAX_CONNECTION_RETRIES,
            queue_endpoint: None,
            queues: QueueNames::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl MigrationSettings {
    /// Loads and validates settings.
    ///
    /// An explicit `path` must exist. Without one, the platform settings file
    /// is read if present and defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::read(path)?,
            None => {
                let default_path = DcmPaths::settings_file()?;
                if default_path.exists() {
                    Self::read(&default_path)?
                } else {
                    tracing::debug!(path = %default_path.display(), "No settings file, using defaults");
                    Self::default()
                }
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DcmError::config(format!("Invalid settings: {}", e)))
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DcmError::config(format!("Cannot read settings file {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "Loaded settings file");
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(DcmError::config("poll_interval_secs must be greater than zero"));
        }
        if self.max_backoff_secs < self.poll_interval_secs {
            return Err(DcmError::config(format!(
                "max_backoff_secs ({}) must not be smaller than poll_interval_secs ({})",
                self.max_backoff_secs, self.poll_interval_secs
            )));
        }
        if let Some(endpoint) = &self.queue_endpoint {
            if endpoint.trim().is_empty() {
                return Err(DcmError::config("queue_endpoint must not be blank"));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(DcmPaths::data_dir()?),
        }
    }

    pub fn state_file(&self) -> Result<PathBuf> {
        Ok(DcmPaths::state_file(&self.state_dir()?))
    }
}
