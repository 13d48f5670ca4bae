//! The migration stage machine.
//!
//! Holds the current stage, validates transitions against the stage graph
//! and persists every accepted transition before publishing it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};

use super::error::InvalidMigrationStageError;
use super::model::MigrationStage;
use super::record::{MigrationContext, MigrationRecord};
use super::repository::{MigrationRepository, RecordMutation, RecordUpdate};
use crate::error::{DcmError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Stage changes observed by the machine, in commit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    Transitioned {
        from: MigrationStage,
        to: MigrationStage,
    },
    TransitionRejected {
        from: MigrationStage,
        to: MigrationStage,
    },
    ForceReset {
        from: MigrationStage,
        reason: String,
    },
}

/// Point-in-time view of the current stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub stage: MigrationStage,
    pub entered_at: DateTime<Utc>,
    pub elapsed: Duration,
}

struct Published {
    record: MigrationRecord,
    /// Monotonic anchor taken when `record` was installed.
    anchor: Instant,
    /// Time already spent in the stage when `anchor` was taken.
    offset: Duration,
}

impl Published {
    fn fresh(record: MigrationRecord) -> Self {
        Self {
            record,
            anchor: Instant::now(),
            offset: Duration::ZERO,
        }
    }

    fn restored(record: MigrationRecord) -> Self {
        let offset = (Utc::now() - record.entered_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Self {
            record,
            anchor: Instant::now(),
            offset,
        }
    }

    fn elapsed(&self) -> Duration {
        self.offset + self.anchor.elapsed()
    }
}

/// Owns the current migration stage.
///
/// Every write is a single read-modify-write against the repository: the
/// persisted record is re-read, validated and replaced in one step, so a
/// writer in another process sharing the store can never be overwritten by
/// a transition validated against an older stage. Writers in this process
/// are additionally serialized by an async mutex. Readers only take a short
/// read lock on the published record and never wait on storage I/O; the
/// published record is refreshed from the store after every write attempt
/// and on [`refresh`](Self::refresh).
pub struct MigrationStageMachine {
    repository: Arc<dyn MigrationRepository>,
    published: RwLock<Published>,
    write_lock: Mutex<()>,
    events: broadcast::Sender<StageEvent>,
}

impl MigrationStageMachine {
    /// Loads the persisted stage, or starts at `NotStarted` if nothing was
    /// ever recorded.
    pub async fn load(repository: Arc<dyn MigrationRepository>) -> Result<Self> {
        let published = match repository.load().await? {
            Some(record) => {
                tracing::info!(stage = %record.stage, "Resuming migration from persisted stage");
                Published::restored(record)
            }
            None => {
                tracing::debug!("No persisted migration stage, starting at not_started");
                Published::fresh(MigrationRecord::new())
            }
        };

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            repository,
            published: RwLock::new(published),
            write_lock: Mutex::new(()),
            events,
        })
    }

    /// Stage as of the last read or write of the store by this machine.
    pub fn current_stage(&self) -> MigrationStage {
        self.read(|published| published.record.stage)
    }

    pub fn snapshot(&self) -> StageSnapshot {
        self.read(|published| StageSnapshot {
            stage: published.record.stage,
            entered_at: published.record.entered_at,
            elapsed: published.elapsed(),
        })
    }

    /// Time spent in the current stage, recomputed on every call.
    pub fn stage_elapsed(&self) -> Duration {
        self.read(Published::elapsed)
    }

    pub fn record(&self) -> MigrationRecord {
        self.read(|published| published.record.clone())
    }

    pub fn context(&self) -> MigrationContext {
        self.read(|published| published.record.context.clone())
    }

    /// Re-reads the store and publishes what it holds.
    ///
    /// Picks up transitions and resets committed by other processes sharing
    /// the same store.
    pub async fn refresh(&self) -> Result<MigrationStage> {
        let _guard = self.write_lock.lock().await;
        match self.repository.load().await? {
            Some(record) => Ok(self.adopt(record)),
            None => Ok(self.current_stage()),
        }
    }

    /// Fails unless the migration is currently in `expected`.
    pub fn assert_current_stage(&self, expected: MigrationStage) -> Result<()> {
        let current = self.current_stage();
        if current != expected {
            return Err(InvalidMigrationStageError::with_context(
                current,
                expected,
                format!("Expected to be in stage `{}` but was in `{}`", expected, current),
            )
            .into());
        }
        Ok(())
    }

    /// Moves to `to` if it is a legal successor of the current stage.
    pub async fn transition(&self, to: MigrationStage) -> Result<()> {
        self.apply(None, to, None, |_| {}).await
    }

    /// Like [`transition`](Self::transition), with a context string carried
    /// into the error on rejection.
    pub async fn transition_with_context(&self, to: MigrationStage, context: &str) -> Result<()> {
        self.apply(None, to, Some(context.to_string()), |_| {}).await
    }

    /// Compare-and-swap transition: also rejected when the persisted stage
    /// is not `expected`.
    pub async fn transition_from(&self, expected: MigrationStage, to: MigrationStage) -> Result<()> {
        self.apply(Some(expected), to, None, |_| {}).await
    }

    /// Transition that also applies `update` to the migration context. Both
    /// land in the same durable write; on rejection neither does.
    pub async fn transition_with_update<F>(&self, to: MigrationStage, update: F) -> Result<()>
    where
        F: FnOnce(&mut MigrationContext) + Send + 'static,
    {
        self.apply(None, to, None, update).await
    }

    /// [`transition_from`](Self::transition_from) combined with a context
    /// update.
    pub async fn transition_from_with_update<F>(
        &self,
        expected: MigrationStage,
        to: MigrationStage,
        update: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut MigrationContext) + Send + 'static,
    {
        self.apply(Some(expected), to, None, update).await
    }

    /// Unconditionally returns to `NotStarted`, bypassing the stage graph.
    ///
    /// Starts a new migration attempt from whatever the store holds, even if
    /// another process moved it since this machine last looked. Workers
    /// still running for the old attempt are not signalled; they must notice
    /// the stage change themselves. Returns the stage the migration was in.
    pub async fn force_reset(&self, reason: &str) -> Result<MigrationStage> {
        let _guard = self.write_lock.lock().await;
        let RecordUpdate { previous, current } = self
            .repository
            .update(self.record(), Box::new(|persisted: &MigrationRecord| Ok(persisted.reset())))
            .await?;
        self.install(Published::fresh(current));

        tracing::warn!(
            target: "dcmigrate::stage::reset",
            forced = true,
            from = %previous.stage,
            reason,
            "Migration stage forcibly reset to not_started"
        );
        let _ = self.events.send(StageEvent::ForceReset {
            from: previous.stage,
            reason: reason.to_string(),
        });
        Ok(previous.stage)
    }

    /// Applies `update` to the migration context and persists it without
    /// changing the stage.
    ///
    /// Fails with a conflict if the store moved to another stage or another
    /// attempt since this machine last looked.
    pub async fn update_context<F>(&self, update: F) -> Result<MigrationContext>
    where
        F: FnOnce(&mut MigrationContext) + Send + 'static,
    {
        self.modify_context(None, move |context| {
            update(context);
            Ok(())
        })
        .await
    }

    /// Applies `update` to the context only while the persisted stage is
    /// `stage`. `update` may refuse by returning an error, in which case
    /// nothing is written.
    pub async fn try_update_context_in<F>(
        &self,
        stage: MigrationStage,
        update: F,
    ) -> Result<MigrationContext>
    where
        F: FnOnce(&mut MigrationContext) -> Result<()> + Send + 'static,
    {
        self.modify_context(Some(stage), update).await
    }

    /// Subscribes to stage events committed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.events.subscribe()
    }

    async fn apply<F>(
        &self,
        expected: Option<MigrationStage>,
        to: MigrationStage,
        context: Option<String>,
        update: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut MigrationContext) + Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        let cached = self.record();
        let attempt = cached.context.migration_id.clone();
        let expected_stage = expected.unwrap_or(cached.stage);

        let mutation: RecordMutation = Box::new(move |persisted: &MigrationRecord| {
            let from = persisted.stage;
            let rejection = if persisted.context.migration_id != attempt {
                Some(InvalidMigrationStageError::with_context(
                    from,
                    to,
                    context.unwrap_or_else(|| {
                        format!("Migration `{}` was replaced by a reset", attempt)
                    }),
                ))
            } else if from != expected_stage {
                Some(InvalidMigrationStageError::with_context(
                    from,
                    to,
                    context.unwrap_or_else(|| {
                        format!("Expected current stage `{}`", expected_stage)
                    }),
                ))
            } else if !from.is_valid_transition(to) {
                Some(match context {
                    Some(context) => InvalidMigrationStageError::with_context(from, to, context),
                    None => InvalidMigrationStageError::new(from, to),
                })
            } else {
                None
            };

            match rejection {
                Some(err) => Err(DcmError::InvalidStage(err)),
                None => {
                    let mut next = persisted.advanced_to(to);
                    update(&mut next.context);
                    Ok(next)
                }
            }
        });

        match self.repository.update(cached, mutation).await {
            Ok(RecordUpdate { previous, current }) => {
                let from = previous.stage;
                self.install(Published::fresh(current));
                tracing::info!(from = %from, to = %to, "Stage transition");
                let _ = self.events.send(StageEvent::Transitioned { from, to });
                Ok(())
            }
            Err(DcmError::InvalidStage(err)) => {
                tracing::warn!(from = %err.from, to = %to, "Invalid stage transition: {}", err);
                let _ = self.events.send(StageEvent::TransitionRejected { from: err.from, to });
                self.resync().await;
                Err(DcmError::InvalidStage(err))
            }
            Err(err) => Err(err),
        }
    }

    async fn modify_context<F>(&self, stage: Option<MigrationStage>, update: F) -> Result<MigrationContext>
    where
        F: FnOnce(&mut MigrationContext) -> Result<()> + Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        let cached = self.record();
        let attempt = cached.context.migration_id.clone();
        let expected_stage = stage.unwrap_or(cached.stage);

        let mutation: RecordMutation = Box::new(move |persisted: &MigrationRecord| {
            if persisted.context.migration_id != attempt || persisted.stage != expected_stage {
                return Err(DcmError::conflict(format!(
                    "Expected migration `{}` in stage `{}` but the store holds `{}` in `{}`",
                    attempt, expected_stage, persisted.context.migration_id, persisted.stage
                )));
            }
            let mut next = persisted.clone();
            update(&mut next.context)?;
            Ok(next)
        });

        match self.repository.update(cached, mutation).await {
            Ok(RecordUpdate { current, .. }) => {
                let context = current.context.clone();
                self.adopt(current);
                Ok(context)
            }
            Err(err) => {
                if err.is_conflict() {
                    self.resync().await;
                }
                Err(err)
            }
        }
    }

    /// Publishes a record read from the store, keeping the running clock
    /// when it describes the stage entry already published.
    fn adopt(&self, record: MigrationRecord) -> MigrationStage {
        let stage = record.stage;
        let mut published = self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let same_entry = published.record.stage == stage
            && published.record.context.migration_id == record.context.migration_id;
        if same_entry {
            published.record = record;
        } else {
            tracing::info!(
                from = %published.record.stage,
                to = %stage,
                "Observed stage change committed by another writer"
            );
            *published = Published::restored(record);
        }
        stage
    }

    async fn resync(&self) {
        match self.repository.load().await {
            Ok(Some(record)) => {
                self.adopt(record);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "Could not re-read migration record after a rejected write");
            }
        }
    }

    fn install(&self, published: Published) {
        *self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner) = published;
    }

    fn read<T>(&self, f: impl FnOnce(&Published) -> T) -> T {
        let published = self
            .published
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use strum::IntoEnumIterator;

    // Mock MigrationRepository for testing
    #[derive(Default)]
    struct MockMigrationRepository {
        record: StdMutex<Option<MigrationRecord>>,
        saves: AtomicUsize,
        fail_saves: AtomicBool,
    }

    #[async_trait]
    impl MigrationRepository for MockMigrationRepository {
        async fn load(&self) -> Result<Option<MigrationRecord>> {
            Ok(self.record.lock().unwrap().clone())
        }

        async fn save(&self, record: &MigrationRecord) -> Result<()> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(DcmError::persistence("disk full"));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.record.lock().unwrap() = Some(record.clone());
            Ok(())
        }

        async fn update(&self, initial: MigrationRecord, mutate: RecordMutation) -> Result<RecordUpdate> {
            let mut stored = self.record.lock().unwrap();
            let previous = stored.clone().unwrap_or(initial);
            let current = mutate(&previous)?;
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(DcmError::persistence("disk full"));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            *stored = Some(current.clone());
            Ok(RecordUpdate { previous, current })
        }
    }

    async fn machine_at(stage: MigrationStage) -> (Arc<MockMigrationRepository>, MigrationStageMachine) {
        let repository = Arc::new(MockMigrationRepository::default());
        *repository.record.lock().unwrap() = Some(MigrationRecord::new().advanced_to(stage));
        let machine = MigrationStageMachine::load(repository.clone()).await.unwrap();
        (repository, machine)
    }

    async fn shared_machines(
        stage: MigrationStage,
    ) -> (Arc<MockMigrationRepository>, MigrationStageMachine, MigrationStageMachine) {
        let (repository, first) = machine_at(stage).await;
        let second = MigrationStageMachine::load(repository.clone()).await.unwrap();
        (repository, first, second)
    }

    #[tokio::test]
    async fn test_defaults_to_not_started() {
        let repository = Arc::new(MockMigrationRepository::default());
        let machine = MigrationStageMachine::load(repository.clone()).await.unwrap();

        assert_eq!(machine.current_stage(), MigrationStage::NotStarted);
        assert_eq!(repository.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transition_persists_before_publishing() {
        let (repository, machine) = machine_at(MigrationStage::NotStarted).await;

        machine.transition(MigrationStage::Authentication).await.unwrap();

        assert_eq!(machine.current_stage(), MigrationStage::Authentication);
        let persisted = repository.record.lock().unwrap().clone().unwrap();
        assert_eq!(persisted.stage, MigrationStage::Authentication);
    }

    #[tokio::test]
    async fn test_not_started_rejects_everything_but_authentication() {
        for target in MigrationStage::iter().filter(|s| *s != MigrationStage::Authentication) {
            let (_, machine) = machine_at(MigrationStage::NotStarted).await;
            let err = machine.transition(target).await.unwrap_err();
            match err {
                DcmError::InvalidStage(invalid) => {
                    assert_eq!(invalid.from, MigrationStage::NotStarted);
                    assert_eq!(invalid.to, target);
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(machine.current_stage(), MigrationStage::NotStarted);
        }
    }

    #[tokio::test]
    async fn test_rejection_carries_context() {
        let (_, machine) = machine_at(MigrationStage::FsMigrationCopy).await;
        let err = machine
            .transition_with_context(MigrationStage::Finished, "Cannot finish migration")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Cannot finish migration. "));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_stage_unchanged() {
        let (repository, machine) = machine_at(MigrationStage::Authentication).await;
        repository.fail_saves.store(true, Ordering::SeqCst);

        let err = machine
            .transition(MigrationStage::ProvisionApplication)
            .await
            .unwrap_err();

        assert!(err.is_persistence());
        assert_eq!(machine.current_stage(), MigrationStage::Authentication);
    }

    #[tokio::test]
    async fn test_transition_from_checks_expected_stage() {
        let (_, machine) = machine_at(MigrationStage::FsMigrationCopyWait).await;

        let err = machine
            .transition_from(MigrationStage::FinalSyncWait, MigrationStage::Validate)
            .await
            .unwrap_err();
        assert!(err.is_invalid_transition());

        machine
            .transition_from(MigrationStage::FsMigrationCopyWait, MigrationStage::OfflineWarning)
            .await
            .unwrap();
        assert_eq!(machine.current_stage(), MigrationStage::OfflineWarning);
    }

    #[tokio::test]
    async fn test_force_reset_from_every_stage() {
        for stage in MigrationStage::iter() {
            let (repository, machine) = machine_at(stage).await;
            let previous = machine.force_reset("operator abandoned migration").await.unwrap();

            assert_eq!(previous, stage);
            assert_eq!(machine.current_stage(), MigrationStage::NotStarted);
            let persisted = repository.record.lock().unwrap().clone().unwrap();
            assert_eq!(persisted.stage, MigrationStage::NotStarted);
            assert_eq!(persisted.reset_count, 1);
        }
    }

    #[tokio::test]
    async fn test_events_distinguish_reset_from_transition() {
        let (_, machine) = machine_at(MigrationStage::NotStarted).await;
        let mut events = machine.subscribe();

        machine.transition(MigrationStage::Authentication).await.unwrap();
        let _ = machine.transition(MigrationStage::Finished).await;
        machine.force_reset("restart").await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            StageEvent::Transitioned {
                from: MigrationStage::NotStarted,
                to: MigrationStage::Authentication
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StageEvent::TransitionRejected {
                from: MigrationStage::Authentication,
                to: MigrationStage::Finished
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StageEvent::ForceReset {
                from: MigrationStage::Authentication,
                reason: "restart".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_update_context_keeps_stage_and_clock() {
        let (repository, machine) = machine_at(MigrationStage::ProvisionApplication).await;
        let entered_at = machine.snapshot().entered_at;

        machine
            .update_context(|ctx| ctx.application_stack_id = Some("stack-1".to_string()))
            .await
            .unwrap();

        assert_eq!(machine.current_stage(), MigrationStage::ProvisionApplication);
        assert_eq!(machine.snapshot().entered_at, entered_at);
        let persisted = repository.record.lock().unwrap().clone().unwrap();
        assert_eq!(persisted.context.application_stack_id.as_deref(), Some("stack-1"));
    }

    #[tokio::test]
    async fn test_transition_with_update_is_all_or_nothing() {
        let (repository, machine) = machine_at(MigrationStage::FsMigrationCopy).await;

        let rejected = machine
            .transition_with_update(MigrationStage::Validate, |ctx| {
                ctx.last_error = Some("should not land".to_string())
            })
            .await;
        assert!(rejected.is_err());
        assert!(machine.context().last_error.is_none());

        machine
            .transition_with_update(MigrationStage::FsMigrationError, |ctx| {
                ctx.last_error = Some("bucket unreachable".to_string())
            })
            .await
            .unwrap();
        let persisted = repository.record.lock().unwrap().clone().unwrap();
        assert_eq!(persisted.stage, MigrationStage::FsMigrationError);
        assert_eq!(persisted.context.last_error.as_deref(), Some("bucket unreachable"));
    }

    #[tokio::test]
    async fn test_elapsed_increases_without_stage_change() {
        let (_, machine) = machine_at(MigrationStage::DbMigrationExport).await;
        let first = machine.stage_elapsed();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = machine.stage_elapsed();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_restored_elapsed_includes_time_before_restart() {
        let repository = Arc::new(MockMigrationRepository::default());
        let mut record = MigrationRecord::new().advanced_to(MigrationStage::DbMigrationUpload);
        record.entered_at = Utc::now() - chrono::Duration::seconds(120);
        *repository.record.lock().unwrap() = Some(record);

        let machine = MigrationStageMachine::load(repository).await.unwrap();
        assert!(machine.stage_elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_transitions_commit_exactly_once() {
        let (repository, machine) = machine_at(MigrationStage::NotStarted).await;
        let machine = Arc::new(machine);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let machine = machine.clone();
                tokio::spawn(async move {
                    machine.transition(MigrationStage::Authentication).await
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(err) => {
                    assert!(err.is_invalid_transition());
                }
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(machine.current_stage(), MigrationStage::Authentication);
        assert_eq!(repository.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transition_validated_against_store_not_cache() {
        let (repository, worker, operator) = shared_machines(MigrationStage::FsMigrationCopyWait).await;

        operator.force_reset("abandon").await.unwrap();
        let err = worker
            .transition_from(MigrationStage::FsMigrationCopyWait, MigrationStage::OfflineWarning)
            .await
            .unwrap_err();

        assert!(err.is_invalid_transition());
        let persisted = repository.record.lock().unwrap().clone().unwrap();
        assert_eq!(persisted.stage, MigrationStage::NotStarted);
        assert_eq!(persisted.reset_count, 1);
        assert_eq!(worker.current_stage(), MigrationStage::NotStarted);
        assert_eq!(worker.context().migration_id, persisted.context.migration_id);
    }

    #[tokio::test]
    async fn test_plain_transition_rejected_after_reset_and_replay() {
        let (_, worker, operator) = shared_machines(MigrationStage::Authentication).await;

        operator.force_reset("restart").await.unwrap();
        operator.transition(MigrationStage::Authentication).await.unwrap();

        // Same stage, different attempt.
        let err = worker
            .transition(MigrationStage::ProvisionApplication)
            .await
            .unwrap_err();
        assert!(err.is_invalid_transition());
        assert_eq!(operator.current_stage(), MigrationStage::Authentication);
    }

    #[tokio::test]
    async fn test_force_reset_counts_from_store() {
        let (repository, first, second) = shared_machines(MigrationStage::Validate).await;

        assert_eq!(first.force_reset("one").await.unwrap(), MigrationStage::Validate);
        assert_eq!(second.force_reset("two").await.unwrap(), MigrationStage::NotStarted);

        let persisted = repository.record.lock().unwrap().clone().unwrap();
        assert_eq!(persisted.reset_count, 2);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_other_writer() {
        let (_, watcher, driver) = shared_machines(MigrationStage::NotStarted).await;

        driver.transition(MigrationStage::Authentication).await.unwrap();
        assert_eq!(watcher.current_stage(), MigrationStage::NotStarted);

        assert_eq!(watcher.refresh().await.unwrap(), MigrationStage::Authentication);
        assert_eq!(watcher.current_stage(), MigrationStage::Authentication);
    }

    #[tokio::test]
    async fn test_update_context_conflicts_after_reset() {
        let (repository, worker, operator) = shared_machines(MigrationStage::ProvisionApplication).await;
        operator.force_reset("abandon").await.unwrap();

        let err = worker
            .update_context(|ctx| ctx.application_stack_id = Some("stack-1".to_string()))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        let persisted = repository.record.lock().unwrap().clone().unwrap();
        assert!(persisted.context.application_stack_id.is_none());
    }

    #[tokio::test]
    async fn test_try_update_context_in_can_refuse() {
        let (repository, machine) = machine_at(MigrationStage::ProvisionApplication).await;

        let wrong_stage = machine
            .try_update_context_in(MigrationStage::ProvisionMigrationStack, |_| Ok(()))
            .await
            .unwrap_err();
        assert!(wrong_stage.is_conflict());

        let refused = machine
            .try_update_context_in(MigrationStage::ProvisionApplication, |_| {
                Err(DcmError::conflict("already claimed"))
            })
            .await
            .unwrap_err();
        assert!(refused.is_conflict());
        assert_eq!(repository.saves.load(Ordering::SeqCst), 0);
    }
}
