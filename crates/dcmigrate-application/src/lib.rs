//! Application layer for dcmigrate.
//!
//! Use cases that drive the migration stage machine: the operator-facing
//! service facade, the provisioning and queue-drain drivers, and the
//! registry of progress reports.

pub mod migration_service;
pub mod provisioning_service;
pub mod queue_drain;
pub mod report_manager;
pub mod status_view;

pub use migration_service::MigrationService;
pub use provisioning_service::{ProvisioningService, StackOutcome};
pub use queue_drain::{DrainOutcome, DrainPolicy, QueueDrainWatcher};
pub use report_manager::{FileSystemReportManager, ReportType};
pub use status_view::MigrationStatusView;
