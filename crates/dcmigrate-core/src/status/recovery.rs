//! Maps the current stage to what an operator can do about it.

use serde::Serialize;

use crate::stage::{MigrationPhase, MigrationStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationHealth {
    NotStarted,
    Running,
    /// Waiting on an explicit operator decision before continuing.
    AwaitingOperator,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    None,
    /// Abandon the attempt and restart from `not_started`.
    ForceReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStatus {
    pub health: MigrationHealth,
    /// Phase whose failure produced the current error stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<MigrationPhase>,
    pub action: RecoveryAction,
}

impl RecoveryStatus {
    pub fn for_stage(stage: MigrationStage) -> Self {
        use MigrationStage::*;

        let (health, failed_phase) = match stage {
            NotStarted => (MigrationHealth::NotStarted, None),
            OfflineWarning => (MigrationHealth::AwaitingOperator, None),
            Finished => (MigrationHealth::Finished, None),
            ProvisioningError => (MigrationHealth::Failed, Some(MigrationPhase::Provisioning)),
            FsMigrationError => (MigrationHealth::Failed, Some(MigrationPhase::FileSystem)),
            FinalSyncError => (MigrationHealth::Failed, Some(MigrationPhase::DataImport)),
            Error => (MigrationHealth::Failed, None),
            Authentication
            | ProvisionApplication
            | ProvisionApplicationWait
            | ProvisionMigrationStack
            | ProvisionMigrationStackWait
            | FsMigrationCopy
            | FsMigrationCopyWait
            | DbMigrationExport
            | DbMigrationExportWait
            | DbMigrationUpload
            | DbMigrationUploadWait
            | DataMigrationImport
            | DataMigrationImportWait
            | FinalSyncWait
            | Validate => (MigrationHealth::Running, None),
        };

        let action = if health == MigrationHealth::Failed {
            RecoveryAction::ForceReset
        } else {
            RecoveryAction::None
        };

        Self {
            health,
            failed_phase,
            action,
        }
    }

    pub fn needs_reset(&self) -> bool {
        self.action == RecoveryAction::ForceReset
    }
}
