//! Path resolution for dcmigrate files.
//!
//! ```text
//! ~/.config/dcmigrate/          # Config directory
//! └── dcmigrate.toml            # MigrationSettings
//!
//! ~/.local/share/dcmigrate/     # Default state directory
//! ├── migration.toml            # Durable migration record
//! └── migration.lock            # Writer lock for the record
//! ```

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::migration_repository::MIGRATION_FILE_NAME;

const APP_NAME: &str = "dcmigrate";
pub const SETTINGS_FILE_NAME: &str = "dcmigrate.toml";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("Cannot determine the platform {0} directory")]
    PlatformDirNotFound(&'static str),
}

impl From<PathError> for dcmigrate_core::DcmError {
    fn from(err: PathError) -> Self {
        dcmigrate_core::DcmError::config(err.to_string())
    }
}

pub struct DcmPaths;

impl DcmPaths {
    /// Platform config directory, e.g. `~/.config/dcmigrate/`.
    pub fn config_dir() -> Result<PathBuf, PathError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_NAME))
            .ok_or(PathError::PlatformDirNotFound("config"))
    }

    /// Platform data directory, e.g. `~/.local/share/dcmigrate/`. The default
    /// state directory.
    pub fn data_dir() -> Result<PathBuf, PathError> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_NAME))
            .ok_or(PathError::PlatformDirNotFound("data"))
    }

    pub fn settings_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join(SETTINGS_FILE_NAME))
    }

    pub fn state_file(state_dir: &Path) -> PathBuf {
        state_dir.join(MIGRATION_FILE_NAME)
    }
}
