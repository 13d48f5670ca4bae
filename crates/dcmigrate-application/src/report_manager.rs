//! Holds the progress report of each file transfer phase.

use dcmigrate_core::progress::FileSystemMigrationReport;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use strum::{Display, EnumIter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ReportType {
    Filesystem,
    FinalSync,
}

/// One live [`FileSystemMigrationReport`] per [`ReportType`].
///
/// Workers hold an `Arc` to the report they write to. Resetting installs a
/// fresh report; workers still holding the old one keep writing to it
/// unobserved.
#[derive(Default)]
pub struct FileSystemReportManager {
    reports: RwLock<HashMap<ReportType, Arc<FileSystemMigrationReport>>>,
}

impl FileSystemReportManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs and returns a fresh report for `report_type`.
    pub fn reset_report(&self, report_type: ReportType) -> Arc<FileSystemMigrationReport> {
        let report = Arc::new(FileSystemMigrationReport::new());
        self.reports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(report_type, report.clone());
        tracing::debug!(%report_type, "Reset progress report");
        report
    }

    /// The live report, if one has been started.
    pub fn current_report(&self, report_type: ReportType) -> Option<Arc<FileSystemMigrationReport>> {
        self.reports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&report_type)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcmigrate_core::progress::FileSystemMigrationProgress;
    use strum::IntoEnumIterator;

    #[test]
    fn test_no_report_until_reset() {
        let manager = FileSystemReportManager::new();
        for report_type in ReportType::iter() {
            assert!(manager.current_report(report_type).is_none());
        }
    }

    #[test]
    fn test_reports_are_independent() {
        let manager = FileSystemReportManager::new();
        manager.reset_report(ReportType::Filesystem).report_file_found();
        manager.reset_report(ReportType::FinalSync);

        let fs = manager.current_report(ReportType::Filesystem).unwrap();
        let sync = manager.current_report(ReportType::FinalSync).unwrap();
        assert_eq!(fs.number_of_files_found(), 1);
        assert_eq!(sync.number_of_files_found(), 0);
    }

    #[test]
    fn test_reset_detaches_old_report() {
        let manager = FileSystemReportManager::new();
        let old = manager.reset_report(ReportType::Filesystem);
        old.report_file_migrated();

        manager.reset_report(ReportType::Filesystem);
        old.report_file_migrated();

        assert_eq!(old.count_of_migrated_files(), 2);
        let current = manager.current_report(ReportType::Filesystem).unwrap();
        assert_eq!(current.count_of_migrated_files(), 0);
    }

    #[test]
    fn test_report_type_names() {
        assert_eq!(ReportType::FinalSync.to_string(), "final_sync");
    }
}
