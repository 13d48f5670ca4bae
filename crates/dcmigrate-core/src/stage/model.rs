//! Migration stage domain model.
//!
//! The stage graph is expressed as the set of legal predecessors of each
//! stage. Every query on the graph (`is_valid_transition`, `successors`,
//! `is_after`) derives from that single table.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use MigrationStage::*;

/// Every stage that may fall into the generic `Error` sink.
const IN_FLIGHT: &[MigrationStage] = &[
    Authentication,
    ProvisionApplication,
    ProvisionApplicationWait,
    ProvisionMigrationStack,
    ProvisionMigrationStackWait,
    FsMigrationCopy,
    FsMigrationCopyWait,
    OfflineWarning,
    DbMigrationExport,
    DbMigrationExportWait,
    DbMigrationUpload,
    DbMigrationUploadWait,
    DataMigrationImport,
    DataMigrationImportWait,
    FinalSyncWait,
    Validate,
];

/// All possible states of an on-premise to cloud migration.
///
/// The symbolic name (`Display`, `FromStr`, serde) is the lowercase
/// snake_case form, e.g. `fs_migration_copy_wait`. That name is what gets
/// persisted, so renaming a variant is a storage format change.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MigrationStage {
    NotStarted,
    Authentication,
    ProvisionApplication,
    ProvisionApplicationWait,
    ProvisionMigrationStack,
    ProvisionMigrationStackWait,
    ProvisioningError,
    FsMigrationCopy,
    FsMigrationCopyWait,
    FsMigrationError,
    OfflineWarning,
    DbMigrationExport,
    DbMigrationExportWait,
    DbMigrationUpload,
    DbMigrationUploadWait,
    DataMigrationImport,
    DataMigrationImportWait,
    FinalSyncWait,
    FinalSyncError,
    Validate,
    Finished,
    Error,
}

/// Coarse grouping of stages for consumers that only need to know which part
/// of the migration is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MigrationPhase {
    PreFlight,
    Provisioning,
    FileSystem,
    Database,
    DataImport,
    Validation,
    Complete,
    Failed,
}

impl Default for MigrationStage {
    fn default() -> Self {
        NotStarted
    }
}

impl MigrationStage {
    /// The stages from which this stage may be entered.
    pub fn valid_ancestor_stages(self) -> &'static [MigrationStage] {
        match self {
            NotStarted => &[],
            Authentication => &[NotStarted],
            ProvisionApplication => &[Authentication],
            ProvisionApplicationWait => &[ProvisionApplication],
            ProvisionMigrationStack => &[ProvisionApplicationWait],
            ProvisionMigrationStackWait => &[ProvisionMigrationStack],
            ProvisioningError => &[
                ProvisionApplication,
                ProvisionApplicationWait,
                ProvisionMigrationStack,
                ProvisionMigrationStackWait,
            ],
            FsMigrationCopy => &[ProvisionMigrationStackWait],
            FsMigrationCopyWait => &[FsMigrationCopy],
            FsMigrationError => &[FsMigrationCopy, FsMigrationCopyWait],
            OfflineWarning => &[FsMigrationCopyWait],
            DbMigrationExport => &[OfflineWarning],
            DbMigrationExportWait => &[DbMigrationExport],
            DbMigrationUpload => &[DbMigrationExportWait],
            DbMigrationUploadWait => &[DbMigrationUpload],
            DataMigrationImport => &[DbMigrationUploadWait],
            DataMigrationImportWait => &[DataMigrationImport],
            FinalSyncWait => &[DataMigrationImportWait],
            FinalSyncError => &[
                DbMigrationExport,
                DbMigrationExportWait,
                DbMigrationUpload,
                DbMigrationUploadWait,
                DataMigrationImport,
                DataMigrationImportWait,
                FinalSyncWait,
            ],
            Validate => &[FinalSyncWait],
            Finished => &[Validate],
            Error => IN_FLIGHT,
        }
    }

    /// Returns true if the graph has an edge from `self` to `to`.
    ///
    /// Error sinks and `Finished` have no outgoing edges; only a force reset
    /// moves the migration out of them.
    pub fn is_valid_transition(self, to: MigrationStage) -> bool {
        to.valid_ancestor_stages().contains(&self)
    }

    /// All stages reachable from `self` in one transition.
    pub fn successors(self) -> Vec<MigrationStage> {
        MigrationStage::iter()
            .filter(|candidate| self.is_valid_transition(*candidate))
            .collect()
    }

    /// Returns true if `self` comes later in the migration than `stage`.
    ///
    /// `Finished` and `Error` are after every other stage, `NotStarted` is
    /// after none, and a stage is never after itself.
    pub fn is_after(self, stage: MigrationStage) -> bool {
        if self == stage || self == NotStarted {
            return false;
        }
        if self == Finished || self == Error {
            return true;
        }

        let mut visited = HashSet::new();
        let mut pending: Vec<MigrationStage> = self.valid_ancestor_stages().to_vec();
        while let Some(ancestor) = pending.pop() {
            if ancestor == stage {
                return true;
            }
            if visited.insert(ancestor) {
                pending.extend_from_slice(ancestor.valid_ancestor_stages());
            }
        }
        false
    }

    pub fn is_error_stage(self) -> bool {
        matches!(
            self,
            Error | FsMigrationError | ProvisioningError | FinalSyncError
        )
    }

    /// No outgoing edges: the migration either finished or failed.
    pub fn is_terminal(self) -> bool {
        self == Finished || self.is_error_stage()
    }

    pub fn is_db_phase(self) -> bool {
        matches!(
            self,
            DbMigrationExport | DbMigrationExportWait | DbMigrationUpload | DbMigrationUploadWait
        )
    }

    /// A `*_WAIT` stage, where the driver polls external work.
    pub fn is_wait_stage(self) -> bool {
        matches!(
            self,
            ProvisionApplicationWait
                | ProvisionMigrationStackWait
                | FsMigrationCopyWait
                | DbMigrationExportWait
                | DbMigrationUploadWait
                | DataMigrationImportWait
                | FinalSyncWait
        )
    }

    /// The phase-specific error stage a failure in this stage should move to.
    ///
    /// `None` for stages that cannot fail any further (`NotStarted`,
    /// `Finished` and the error sinks themselves).
    pub fn error_sink(self) -> Option<MigrationStage> {
        match self {
            ProvisionApplication
            | ProvisionApplicationWait
            | ProvisionMigrationStack
            | ProvisionMigrationStackWait => Some(ProvisioningError),
            FsMigrationCopy | FsMigrationCopyWait => Some(FsMigrationError),
            DbMigrationExport
            | DbMigrationExportWait
            | DbMigrationUpload
            | DbMigrationUploadWait
            | DataMigrationImport
            | DataMigrationImportWait
            | FinalSyncWait => Some(FinalSyncError),
            Authentication | OfflineWarning | Validate => Some(Error),
            NotStarted | Finished | ProvisioningError | FsMigrationError | FinalSyncError
            | Error => None,
        }
    }

    pub fn phase(self) -> MigrationPhase {
        match self {
            NotStarted | Authentication => MigrationPhase::PreFlight,
            ProvisionApplication
            | ProvisionApplicationWait
            | ProvisionMigrationStack
            | ProvisionMigrationStackWait => MigrationPhase::Provisioning,
            FsMigrationCopy | FsMigrationCopyWait | OfflineWarning => MigrationPhase::FileSystem,
            DbMigrationExport | DbMigrationExportWait | DbMigrationUpload
            | DbMigrationUploadWait => MigrationPhase::Database,
            DataMigrationImport | DataMigrationImportWait | FinalSyncWait => {
                MigrationPhase::DataImport
            }
            Validate => MigrationPhase::Validation,
            Finished => MigrationPhase::Complete,
            ProvisioningError | FsMigrationError | FinalSyncError | Error => {
                MigrationPhase::Failed
            }
        }
    }

    /// The persisted symbolic name.
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}
