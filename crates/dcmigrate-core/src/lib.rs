//! Domain core for dcmigrate.
//!
//! Holds the migration stage graph and stage machine, the status
//! projections consumed by status endpoints, the progress counters fed by
//! transfer workers, and the contracts for the external queue and
//! provisioning services.

pub mod error;
pub mod progress;
pub mod provisioning;
pub mod queue;
pub mod stage;
pub mod status;

// Re-export common types
pub use error::{DcmError, Result};
pub use stage::{InvalidMigrationStageError, MigrationStage, MigrationStageMachine};
pub use status::{stage_to_status, DatabaseMigrationStatus, DbMigrationStatus};
