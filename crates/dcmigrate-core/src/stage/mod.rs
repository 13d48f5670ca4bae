//! Migration stages, the stage graph and the stage machine.

pub mod error;
pub mod machine;
pub mod model;
pub mod record;
pub mod repository;

pub use error::InvalidMigrationStageError;
pub use machine::{MigrationStageMachine, StageEvent, StageSnapshot};
pub use model::{MigrationPhase, MigrationStage};
pub use record::{MigrationContext, MigrationRecord};
pub use repository::{MigrationRepository, RecordMutation, RecordUpdate};
