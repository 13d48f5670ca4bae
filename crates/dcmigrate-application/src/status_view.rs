//! JSON status document for operator tooling.

use serde::Serialize;

use dcmigrate_core::stage::{MigrationPhase, MigrationRecord, MigrationStage};
use dcmigrate_core::status::{DbMigrationStatus, RecoveryStatus, stage_to_status};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatusView {
    pub migration_id: String,
    pub stage: MigrationStage,
    pub phase: MigrationPhase,
    pub database_status: DbMigrationStatus,
    pub recovery: RecoveryStatus,
    /// Whole seconds spent in `stage`.
    pub elapsed_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub reset_count: u32,
}

impl MigrationStatusView {
    pub fn from_record(record: &MigrationRecord, elapsed: Duration) -> Self {
        let stage = record.stage;
        Self {
            migration_id: record.context.migration_id.clone(),
            stage,
            phase: stage.phase(),
            database_status: stage_to_status(stage),
            recovery: RecoveryStatus::for_stage(stage),
            elapsed_seconds: elapsed.as_secs(),
            last_error: record.context.last_error.clone(),
            reset_count: record.reset_count,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
