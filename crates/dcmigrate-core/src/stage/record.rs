//! Durable migration record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::MigrationStage;

/// Data about the current migration attempt that travels with the stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationContext {
    /// Identifier of this attempt. A force reset starts a new one.
    pub migration_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Message of the failure that moved the migration into an error stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_stack_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_stack_id: Option<String>,
    /// Provisioning stages whose stack request was already handed to the
    /// backend during this attempt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub submitted_stacks: Vec<MigrationStage>,
}

impl MigrationContext {
    pub fn new() -> Self {
        Self {
            migration_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            ended_at: None,
            last_error: None,
            application_stack_id: None,
            migration_stack_id: None,
            submitted_stacks: Vec::new(),
        }
    }
}

impl Default for MigrationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// What the stage store persists.
///
/// `stage` is the single authoritative key; everything else is metadata
/// written in the same atomic update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub stage: MigrationStage,
    /// When `stage` was entered.
    pub entered_at: DateTime<Utc>,
    /// Number of force resets applied over the lifetime of this store.
    #[serde(default)]
    pub reset_count: u32,
    pub context: MigrationContext,
}

impl MigrationRecord {
    /// A fresh, unstarted migration.
    pub fn new() -> Self {
        Self {
            stage: MigrationStage::NotStarted,
            entered_at: Utc::now(),
            reset_count: 0,
            context: MigrationContext::new(),
        }
    }

    /// Same record, moved to `stage` as of now.
    pub fn advanced_to(&self, stage: MigrationStage) -> Self {
        Self {
            stage,
            entered_at: Utc::now(),
            reset_count: self.reset_count,
            context: self.context.clone(),
        }
    }

    /// A new attempt in `NotStarted`, keeping only the reset counter.
    pub fn reset(&self) -> Self {
        Self {
            reset_count: self.reset_count.saturating_add(1),
            ..Self::new()
        }
    }
}

impl Default for MigrationRecord {
    fn default() -> Self {
        Self::new()
    }
}
