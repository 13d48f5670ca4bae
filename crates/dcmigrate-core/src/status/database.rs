//! Database migration status projection.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumIter};

use crate::stage::MigrationStage;

/// Coarse database migration status for clients that do not care about
/// individual sub-stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DbMigrationStatus {
    NotStarted,
    Failed,
    Exporting,
    Uploading,
    Importing,
    Done,
}

/// Projects a stage onto its database status.
///
/// The match is exhaustive on purpose: a new stage does not compile until it
/// is mapped here.
pub fn stage_to_status(stage: MigrationStage) -> DbMigrationStatus {
    use MigrationStage::*;

    match stage {
        NotStarted
        | Authentication
        | ProvisionApplication
        | ProvisionApplicationWait
        | ProvisionMigrationStack
        | ProvisionMigrationStackWait
        | ProvisioningError
        | FsMigrationCopy
        | FsMigrationCopyWait
        | FsMigrationError
        | OfflineWarning => DbMigrationStatus::NotStarted,

        DbMigrationExport | DbMigrationExportWait => DbMigrationStatus::Exporting,

        DbMigrationUpload | DbMigrationUploadWait => DbMigrationStatus::Uploading,

        DataMigrationImport | DataMigrationImportWait | FinalSyncWait => {
            DbMigrationStatus::Importing
        }

        Validate | Finished => DbMigrationStatus::Done,

        FinalSyncError | Error => DbMigrationStatus::Failed,
    }
}

impl From<MigrationStage> for DbMigrationStatus {
    fn from(stage: MigrationStage) -> Self {
        stage_to_status(stage)
    }
}

/// Database status paired with the time spent in the current sub-stage.
///
/// Built on demand from the stage machine; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseMigrationStatus {
    pub status: DbMigrationStatus,
    #[serde(serialize_with = "serialize_duration_secs")]
    pub elapsed_time: Duration,
}

impl DatabaseMigrationStatus {
    pub fn new(status: DbMigrationStatus, elapsed_time: Duration) -> Self {
        Self {
            status,
            elapsed_time,
        }
    }

    pub fn for_stage(stage: MigrationStage, elapsed_time: Duration) -> Self {
        Self::new(stage_to_status(stage), elapsed_time)
    }
}

fn serialize_duration_secs<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_stage_maps_to_a_status() {
        let all: HashSet<_> = DbMigrationStatus::iter().collect();
        for stage in MigrationStage::iter() {
            assert!(all.contains(&stage_to_status(stage)));
        }
    }

    #[test]
    fn test_every_status_is_reachable() {
        let reached: HashSet<_> = MigrationStage::iter().map(stage_to_status).collect();
        assert_eq!(reached.len(), DbMigrationStatus::iter().count());
    }

    #[test]
    fn test_projection_table() {
        assert_eq!(stage_to_status(MigrationStage::OfflineWarning), DbMigrationStatus::NotStarted);
        assert_eq!(stage_to_status(MigrationStage::DbMigrationExportWait), DbMigrationStatus::Exporting);
        assert_eq!(stage_to_status(MigrationStage::DbMigrationUpload), DbMigrationStatus::Uploading);
        assert_eq!(stage_to_status(MigrationStage::FinalSyncWait), DbMigrationStatus::Importing);
        assert_eq!(stage_to_status(MigrationStage::Validate), DbMigrationStatus::Done);
        assert_eq!(stage_to_status(MigrationStage::FinalSyncError), DbMigrationStatus::Failed);
        assert_eq!(stage_to_status(MigrationStage::ProvisioningError), DbMigrationStatus::NotStarted);
    }

    #[test]
    fn test_serializes_for_clients() {
        let status = DatabaseMigrationStatus::for_stage(
            MigrationStage::DbMigrationUploadWait,
            Duration::from_secs(42),
        );
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["status"], "UPLOADING");
        assert_eq!(json["elapsedTime"], 42);
    }
}
