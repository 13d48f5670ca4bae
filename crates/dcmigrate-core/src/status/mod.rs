//! Read-only projections of the current stage for status consumers.

pub mod database;
pub mod recovery;

pub use database::{stage_to_status, DatabaseMigrationStatus, DbMigrationStatus};
pub use recovery::{MigrationHealth, RecoveryAction, RecoveryStatus};
