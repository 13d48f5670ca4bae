//! Filesystem migration progress counters.

use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Number of individual failures kept for display. The failure count itself
/// is unbounded.
pub const MAX_RETAINED_FAILURES: usize = 100;

/// Tracks the progress of the file system migration.
///
/// Every `report_*` method may be called concurrently from any number of
/// upload workers.
pub trait FileSystemMigrationProgress: Send + Sync {
    fn report_file_found(&self);

    fn report_file_upload_commenced(&self);

    fn report_file_migrated(&self);

    /// Reports that discovery has finished. From then on
    /// `number_of_files_found` is the total to migrate.
    fn report_crawling_finished(&self);

    fn report_file_not_migrated(&self, path: PathBuf, reason: String);

    /// Records how many files the remote side has confirmed.
    fn set_number_of_files_downloaded(&self, downloaded: u64);

    fn number_of_files_found(&self) -> u64;

    fn number_of_commenced_file_uploads(&self) -> u64;

    fn count_of_migrated_files(&self) -> u64;

    fn count_of_downloaded_files(&self) -> u64;

    fn count_of_failed_files(&self) -> u64;

    fn is_crawling_finished(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFileMigration {
    pub path: PathBuf,
    pub reason: String,
}

/// Serializable view of a report at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemProgressSnapshot {
    pub files_found: u64,
    pub files_in_flight: u64,
    pub uploaded_files: u64,
    pub downloaded_files: u64,
    pub failed_files: u64,
    pub crawling_finished: bool,
}

impl FileSystemProgressSnapshot {
    /// Commenced and migrated counts never exceed found once all workers
    /// have finished reporting. A snapshot taken mid-flight may briefly
    /// violate this.
    pub fn is_consistent(&self) -> bool {
        self.files_in_flight <= self.files_found && self.uploaded_files <= self.files_found
    }
}

/// Lock-free counter set for one filesystem phase.
#[derive(Debug, Default)]
pub struct FileSystemMigrationReport {
    files_found: AtomicU64,
    uploads_commenced: AtomicU64,
    files_migrated: AtomicU64,
    files_downloaded: AtomicU64,
    files_failed: AtomicU64,
    crawling_finished: AtomicBool,
    recent_failures: Mutex<VecDeque<FailedFileMigration>>,
}

impl FileSystemMigrationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> FileSystemProgressSnapshot {
        FileSystemProgressSnapshot {
            files_found: self.number_of_files_found(),
            files_in_flight: self.number_of_commenced_file_uploads(),
            uploaded_files: self.count_of_migrated_files(),
            downloaded_files: self.count_of_downloaded_files(),
            failed_files: self.count_of_failed_files(),
            crawling_finished: self.is_crawling_finished(),
        }
    }

    /// The most recent failures, oldest first.
    pub fn recent_failures(&self) -> Vec<FailedFileMigration> {
        self.recent_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl FileSystemMigrationProgress for FileSystemMigrationReport {
    fn report_file_found(&self) {
        self.files_found.fetch_add(1, Ordering::Relaxed);
    }

    fn report_file_upload_commenced(&self) {
        self.uploads_commenced.fetch_add(1, Ordering::Relaxed);
    }

    fn report_file_migrated(&self) {
        self.files_migrated.fetch_add(1, Ordering::Relaxed);
    }

    fn report_crawling_finished(&self) {
        self.crawling_finished.store(true, Ordering::Release);
    }

    fn report_file_not_migrated(&self, path: PathBuf, reason: String) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(path = %path.display(), %reason, "File failed to migrate");

        let mut failures = self
            .recent_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if failures.len() == MAX_RETAINED_FAILURES {
            failures.pop_front();
        }
        failures.push_back(FailedFileMigration { path, reason });
    }

    fn set_number_of_files_downloaded(&self, downloaded: u64) {
        // The remote count only moves forward.
        self.files_downloaded.fetch_max(downloaded, Ordering::Relaxed);
    }

    fn number_of_files_found(&self) -> u64 {
        self.files_found.load(Ordering::Relaxed)
    }

    fn number_of_commenced_file_uploads(&self) -> u64 {
        self.uploads_commenced.load(Ordering::Relaxed)
    }

    fn count_of_migrated_files(&self) -> u64 {
        self.files_migrated.load(Ordering::Relaxed)
    }

    fn count_of_downloaded_files(&self) -> u64 {
        self.files_downloaded.load(Ordering::Relaxed)
    }

    fn count_of_failed_files(&self) -> u64 {
        self.files_failed.load(Ordering::Relaxed)
    }

    fn is_crawling_finished(&self) -> bool {
        self.crawling_finished.load(Ordering::Acquire)
    }
}
