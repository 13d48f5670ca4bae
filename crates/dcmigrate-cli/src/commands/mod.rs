pub mod params;
pub mod queue;
pub mod stage;

use anyhow::{Context, Result};
use dcmigrate_application::MigrationService;
use dcmigrate_infrastructure::{MigrationSettings, TomlMigrationRepository};
use std::sync::Arc;

pub(crate) async fn open_service(settings: &MigrationSettings) -> Result<MigrationService> {
    let state_dir = settings.state_dir()?;
    let repository = Arc::new(TomlMigrationRepository::in_dir(&state_dir));
    MigrationService::open(repository)
        .await
        .with_context(|| format!("Failed to load migration state from {}", state_dir.display()))
}
