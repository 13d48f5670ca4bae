//! Progress reporting for the transfer phases.

pub mod filesystem;

pub use filesystem::{
    FailedFileMigration, FileSystemMigrationProgress, FileSystemMigrationReport,
    FileSystemProgressSnapshot, MAX_RETAINED_FAILURES,
};
