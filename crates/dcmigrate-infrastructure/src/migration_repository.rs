//! [`MigrationRepository`] implementations.

use async_trait::async_trait;
use dcmigrate_core::error::{DcmError, Result};
use dcmigrate_core::stage::{MigrationRecord, MigrationRepository, RecordMutation, RecordUpdate};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::storage::AtomicTomlFile;

/// File name of the stage store inside the state directory.
pub const MIGRATION_FILE_NAME: &str = "migration.toml";

/// Persists the migration record as a single TOML document.
///
/// Each write is a full atomic replacement of the file, so a crash mid-write
/// leaves the previous stage intact. `update` holds the store's exclusive
/// file lock from the read to the rename, which makes it atomic with respect
/// to every other process using the same state directory. Blocking file I/O
/// runs on the blocking thread pool.
#[derive(Clone)]
pub struct TomlMigrationRepository {
    file: Arc<AtomicTomlFile<MigrationRecord>>,
}

impl TomlMigrationRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Arc::new(AtomicTomlFile::new(path)),
        }
    }

    /// Repository at `<state_dir>/migration.toml`.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(MIGRATION_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[async_trait]
impl MigrationRepository for TomlMigrationRepository {
    async fn load(&self) -> Result<Option<MigrationRecord>> {
        let file = self.file.clone();
        let loaded = tokio::task::spawn_blocking(move || file.load())
            .await
            .map_err(|e| DcmError::internal(format!("Stage store read task failed: {}", e)))?;
        Ok(loaded?)
    }

    async fn save(&self, record: &MigrationRecord) -> Result<()> {
        let file = self.file.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || file.save(&record))
            .await
            .map_err(|e| DcmError::internal(format!("Stage store write task failed: {}", e)))??;

        tracing::debug!(path = %self.path().display(), "Persisted migration record");
        Ok(())
    }

    async fn update(&self, initial: MigrationRecord, mutate: RecordMutation) -> Result<RecordUpdate> {
        let file = self.file.clone();
        let update = tokio::task::spawn_blocking(move || {
            file.update(initial, |record| {
                let next = mutate(&*record)?;
                let previous = std::mem::replace(record, next);
                Ok::<_, DcmError>(RecordUpdate {
                    previous,
                    current: record.clone(),
                })
            })
        })
        .await
        .map_err(|e| DcmError::internal(format!("Stage store write task failed: {}", e)))??;

        tracing::debug!(
            path = %self.path().display(),
            from = %update.previous.stage,
            to = %update.current.stage,
            "Persisted migration record"
        );
        Ok(update)
    }
}

/// Volatile repository for tests and dry runs.
///
/// Writes can be made to fail on demand to exercise the paths where the
/// stage store rejects a transition.
#[derive(Default)]
pub struct InMemoryMigrationRepository {
    record: Mutex<Option<MigrationRecord>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryMigrationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: MigrationRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            ..Self::default()
        }
    }

    /// While set, every write fails with a persistence error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<MigrationRecord> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MigrationRepository for InMemoryMigrationRepository {
    async fn load(&self) -> Result<Option<MigrationRecord>> {
        Ok(self.stored())
    }

    async fn save(&self, record: &MigrationRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DcmError::persistence("Stage store is unavailable"));
        }
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, initial: MigrationRecord, mutate: RecordMutation) -> Result<RecordUpdate> {
        let mut stored = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = stored.clone().unwrap_or(initial);
        let current = mutate(&previous)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DcmError::persistence("Stage store is unavailable"));
        }
        *stored = Some(current.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(RecordUpdate { previous, current })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcmigrate_core::MigrationStage;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_toml_repository_empty_dir_loads_none() {
        let temp_dir = TempDir::new().unwrap();
        let repo = TomlMigrationRepository::in_dir(temp_dir.path());

        assert!(repo.load().await.unwrap().is_none());
        assert_eq!(repo.path(), temp_dir.path().join("migration.toml"));
    }

    #[tokio::test]
    async fn test_toml_repository_round_trips_record() {
        let temp_dir = TempDir::new().unwrap();
        let repo = TomlMigrationRepository::in_dir(temp_dir.path());

        let mut record = MigrationRecord::new().advanced_to(MigrationStage::FsMigrationCopy);
        record.context.application_stack_id = Some("arn:stack/app".to_string());
        repo.save(&record).await.unwrap();

        let loaded = repo.load().await.unwrap().unwrap();
        assert_eq!(loaded.stage, MigrationStage::FsMigrationCopy);
        assert_eq!(loaded.context.migration_id, record.context.migration_id);
        assert_eq!(
            loaded.context.application_stack_id.as_deref(),
            Some("arn:stack/app")
        );
        assert_eq!(
            loaded.entered_at.timestamp_millis(),
            record.entered_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_toml_repository_stores_stage_as_snake_case() {
        let temp_dir = TempDir::new().unwrap();
        let repo = TomlMigrationRepository::in_dir(temp_dir.path());
        repo.save(&MigrationRecord::new().advanced_to(MigrationStage::DbMigrationExportWait))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(repo.path()).unwrap();
        assert!(raw.contains("stage = \"db_migration_export_wait\""));
    }

    #[tokio::test]
    async fn test_toml_repository_rejects_unknown_stage() {
        let temp_dir = TempDir::new().unwrap();
        let repo = TomlMigrationRepository::in_dir(temp_dir.path());
        std::fs::write(
            repo.path(),
            "stage = \"teleport\"\nenteredAt = \"2024-01-01T00:00:00Z\"\n",
        )
        .unwrap();

        assert!(repo.load().await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_repository_failure_switch() {
        let repo = InMemoryMigrationRepository::new();
        repo.set_fail_writes(true);
        let err = repo.save(&MigrationRecord::new()).await.unwrap_err();
        assert!(err.is_persistence());
        assert!(repo.stored().is_none());

        repo.set_fail_writes(false);
        repo.save(&MigrationRecord::new()).await.unwrap();
        assert_eq!(repo.save_count(), 1);
        assert!(repo.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_toml_update_mutates_persisted_record() {
        let temp_dir = TempDir::new().unwrap();
        let repo = TomlMigrationRepository::in_dir(temp_dir.path());
        let stored = MigrationRecord::new().advanced_to(MigrationStage::Validate);
        repo.save(&stored).await.unwrap();

        let update = repo
            .update(MigrationRecord::new(), Box::new(|persisted: &MigrationRecord| Ok(persisted.reset())))
            .await
            .unwrap();

        assert_eq!(update.previous.context.migration_id, stored.context.migration_id);
        assert_eq!(update.current.stage, MigrationStage::NotStarted);
        assert_eq!(repo.load().await.unwrap().unwrap().reset_count, 1);
    }

    #[tokio::test]
    async fn test_toml_update_refusal_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let repo = TomlMigrationRepository::in_dir(temp_dir.path());

        let err = repo
            .update(
                MigrationRecord::new(),
                Box::new(|_: &MigrationRecord| -> Result<MigrationRecord> {
                    Err(DcmError::conflict("stale"))
                }),
            )
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(repo.load().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_toml_updates_from_separate_handles_never_lose_writes() {
        let temp_dir = TempDir::new().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = TomlMigrationRepository::in_dir(temp_dir.path());
                tokio::spawn(async move {
                    repo.update(
                        MigrationRecord::new(),
                        Box::new(|persisted: &MigrationRecord| Ok(persisted.reset())),
                    )
                    .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let repo = TomlMigrationRepository::in_dir(temp_dir.path());
        assert_eq!(repo.load().await.unwrap().unwrap().reset_count, 8);
    }

    #[tokio::test]
    async fn test_in_memory_update_counts_writes() {
        let repo = InMemoryMigrationRepository::with_record(
            MigrationRecord::new().advanced_to(MigrationStage::Authentication),
        );

        let update = repo
            .update(
                MigrationRecord::new(),
                Box::new(|persisted: &MigrationRecord| {
                    Ok(persisted.advanced_to(MigrationStage::ProvisionApplication))
                }),
            )
            .await
            .unwrap();

        assert_eq!(update.previous.stage, MigrationStage::Authentication);
        assert_eq!(repo.stored().unwrap().stage, MigrationStage::ProvisionApplication);
        assert_eq!(repo.save_count(), 1);
    }
}
