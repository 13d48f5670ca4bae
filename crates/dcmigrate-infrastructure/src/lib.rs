//! Infrastructure for dcmigrate: the durable stage store, settings and
//! path resolution, and queue service clients.

pub mod migration_repository;
pub mod paths;
pub mod queue;
pub mod settings;
pub mod storage;

pub use migration_repository::{InMemoryMigrationRepository, TomlMigrationRepository};
pub use paths::DcmPaths;
pub use settings::MigrationSettings;
