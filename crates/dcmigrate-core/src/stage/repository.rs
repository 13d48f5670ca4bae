//! Migration repository trait.

use async_trait::async_trait;

use super::record::MigrationRecord;
use crate::error::Result;

/// Computes the next record from the one currently persisted.
///
/// Returning an error aborts the update and nothing is written.
pub type RecordMutation = Box<dyn FnOnce(&MigrationRecord) -> Result<MigrationRecord> + Send>;

/// Outcome of a committed [`MigrationRepository::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    /// The record that was persisted when the update started.
    pub previous: MigrationRecord,
    /// The record that is persisted now.
    pub current: MigrationRecord,
}

/// Durable storage for the migration record.
///
/// Implementations must make writes durable before returning: the stage
/// machine only publishes a new stage after the write succeeded, so a
/// process restart resumes from exactly the last acknowledged stage.
///
/// Several processes may share one store. `update` is the only write the
/// stage machine issues, and it must read, mutate and write the record as
/// one step that no other writer of the same store can interleave with.
#[async_trait]
pub trait MigrationRepository: Send + Sync {
    /// Loads the persisted record.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))`: A migration has been recorded
    /// - `Ok(None)`: Nothing has ever been written
    /// - `Err(_)`: The store exists but could not be read
    async fn load(&self) -> Result<Option<MigrationRecord>>;

    /// Replaces the persisted record without looking at what is stored.
    async fn save(&self, record: &MigrationRecord) -> Result<()>;

    /// Atomically replaces the persisted record with `mutate(persisted)`.
    ///
    /// `initial` stands in for the persisted record when nothing has been
    /// written yet. Errors returned by `mutate` are passed through unchanged.
    async fn update(&self, initial: MigrationRecord, mutate: RecordMutation) -> Result<RecordUpdate>;
}
