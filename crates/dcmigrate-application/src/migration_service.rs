//! Migration service facade.
//!
//! The entry point drivers and operator tooling use to read and move the
//! migration stage. All stage writes go through the shared
//! [`MigrationStageMachine`].

use chrono::Utc;
use dcmigrate_core::error::{DcmError, Result};
use dcmigrate_core::stage::{
    InvalidMigrationStageError, MigrationContext, MigrationRepository, MigrationStage,
    MigrationStageMachine,
};
use dcmigrate_core::status::DatabaseMigrationStatus;
use std::sync::Arc;

use crate::status_view::MigrationStatusView;

pub struct MigrationService {
    machine: Arc<MigrationStageMachine>,
}

impl MigrationService {
    pub fn new(machine: Arc<MigrationStageMachine>) -> Self {
        Self { machine }
    }

    /// Loads the persisted stage from `repository` and wraps it in a service.
    pub async fn open(repository: Arc<dyn MigrationRepository>) -> Result<Self> {
        let machine = MigrationStageMachine::load(repository).await?;
        Ok(Self::new(Arc::new(machine)))
    }

    /// The underlying machine, for drivers that share it.
    pub fn machine(&self) -> Arc<MigrationStageMachine> {
        self.machine.clone()
    }

    /// Returns the context of the unstarted migration.
    ///
    /// # Errors
    ///
    /// `DcmError::MigrationExists` once a migration has left `not_started`;
    /// it has to finish or be force reset first.
    pub fn create_migration(&self) -> Result<MigrationContext> {
        let record = self.machine.record();
        if record.stage != MigrationStage::NotStarted {
            return Err(DcmError::MigrationExists {
                stage: record.stage.to_string(),
            });
        }
        Ok(record.context)
    }

    pub fn current_stage(&self) -> MigrationStage {
        self.machine.current_stage()
    }

    pub fn assert_current_stage(&self, expected: MigrationStage) -> Result<()> {
        self.machine.assert_current_stage(expected)
    }

    pub async fn transition(&self, to: MigrationStage) -> Result<()> {
        self.machine.transition(to).await
    }

    /// Moves to the generic `error` stage and records `message`.
    pub async fn error(&self, message: &str) -> Result<()> {
        tracing::error!(stage = %self.current_stage(), "Migration failed: {}", message);
        let message = message.to_string();
        self.machine
            .transition_with_update(MigrationStage::Error, |ctx| ctx.last_error = Some(message))
            .await
    }

    /// Moves to the error stage of the current phase and records `message`.
    /// Returns the error stage entered.
    pub async fn stage_specific_error(&self, message: &str) -> Result<MigrationStage> {
        let current = self.current_stage();
        let sink = current.error_sink().ok_or_else(|| {
            InvalidMigrationStageError::with_context(
                current,
                MigrationStage::Error,
                format!("Stage `{}` has no error transition", current),
            )
        })?;

        tracing::error!(stage = %current, sink = %sink, "Migration phase failed: {}", message);
        let message = message.to_string();
        self.machine
            .transition_with_update(sink, |ctx| ctx.last_error = Some(message))
            .await?;
        Ok(sink)
    }

    /// Moves to `finished` and stamps the end time.
    pub async fn finish_current_migration(&self) -> Result<()> {
        self.machine
            .transition_with_update(MigrationStage::Finished, |ctx| {
                ctx.ended_at = Some(Utc::now())
            })
            .await?;
        tracing::info!(
            migration_id = %self.machine.context().migration_id,
            "Migration finished"
        );
        Ok(())
    }

    /// Abandons the current attempt. Returns the stage it was in.
    pub async fn force_reset(&self, reason: &str) -> Result<MigrationStage> {
        self.machine.force_reset(reason).await
    }

    pub fn database_status(&self) -> DatabaseMigrationStatus {
        let snapshot = self.machine.snapshot();
        DatabaseMigrationStatus::for_stage(snapshot.stage, snapshot.elapsed)
    }

    pub fn status_view(&self) -> MigrationStatusView {
        // Record and elapsed come from separate reads; a transition in
        // between only skews the elapsed figure.
        let record = self.machine.record();
        let elapsed = self.machine.stage_elapsed();
        MigrationStatusView::from_record(&record, elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcmigrate_core::stage::MigrationRecord;
    use dcmigrate_core::status::DbMigrationStatus;
    use dcmigrate_infrastructure::InMemoryMigrationRepository;

    async fn service_at(stage: MigrationStage) -> (Arc<InMemoryMigrationRepository>, MigrationService) {
        let repository = Arc::new(InMemoryMigrationRepository::with_record(
            MigrationRecord::new().advanced_to(stage),
        ));
        let service = MigrationService::open(repository.clone()).await.unwrap();
        (repository, service)
    }

    #[tokio::test]
    async fn test_create_migration_only_when_not_started() {
        let (_, service) = service_at(MigrationStage::NotStarted).await;
        let context = service.create_migration().unwrap();
        assert!(!context.migration_id.is_empty());

        service.transition(MigrationStage::Authentication).await.unwrap();
        let err = service.create_migration().unwrap_err();
        assert!(matches!(err, DcmError::MigrationExists { ref stage } if stage == "authentication"));
    }

    #[tokio::test]
    async fn test_error_records_message() {
        let (repository, service) = service_at(MigrationStage::Validate).await;

        service.error("validation query timed out").await.unwrap();

        assert_eq!(service.current_stage(), MigrationStage::Error);
        let stored = repository.stored().unwrap();
        assert_eq!(stored.context.last_error.as_deref(), Some("validation query timed out"));
    }

    #[tokio::test]
    async fn test_stage_specific_error_uses_phase_sink() {
        let (_, service) = service_at(MigrationStage::DbMigrationUploadWait).await;

        let sink = service.stage_specific_error("upload rejected").await.unwrap();

        assert_eq!(sink, MigrationStage::FinalSyncError);
        assert_eq!(service.status_view().last_error.as_deref(), Some("upload rejected"));
    }

    #[tokio::test]
    async fn test_stage_specific_error_without_sink_is_rejected() {
        let (_, service) = service_at(MigrationStage::Finished).await;

        let err = service.stage_specific_error("too late").await.unwrap_err();

        assert!(err.is_invalid_transition());
        assert_eq!(service.current_stage(), MigrationStage::Finished);
    }

    #[tokio::test]
    async fn test_finish_stamps_end_time() {
        let (_, service) = service_at(MigrationStage::Validate).await;

        service.finish_current_migration().await.unwrap();

        assert_eq!(service.current_stage(), MigrationStage::Finished);
        assert!(service.machine().context().ended_at.is_some());
    }

    #[tokio::test]
    async fn test_finish_outside_validate_is_rejected() {
        let (_, service) = service_at(MigrationStage::FsMigrationCopy).await;
        assert!(service.finish_current_migration().await.is_err());
        assert!(service.machine().context().ended_at.is_none());
    }

    #[tokio::test]
    async fn test_force_reset_starts_new_attempt() {
        let (_, service) = service_at(MigrationStage::FsMigrationError).await;
        let old_id = service.machine().context().migration_id;

        let previous = service.force_reset("bucket policy fixed").await.unwrap();

        assert_eq!(previous, MigrationStage::FsMigrationError);
        assert_eq!(service.current_stage(), MigrationStage::NotStarted);
        assert_ne!(service.create_migration().unwrap().migration_id, old_id);
    }

    #[tokio::test]
    async fn test_database_status_follows_stage() {
        let (_, service) = service_at(MigrationStage::DbMigrationExportWait).await;
        assert_eq!(service.database_status().status, DbMigrationStatus::Exporting);

        service.transition(MigrationStage::DbMigrationUpload).await.unwrap();
        assert_eq!(service.database_status().status, DbMigrationStatus::Uploading);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_stage() {
        let (repository, service) = service_at(MigrationStage::Validate).await;
        repository.set_fail_writes(true);

        assert!(service.error("boom").await.unwrap_err().is_persistence());
        assert_eq!(service.current_stage(), MigrationStage::Validate);
        assert!(service.status_view().last_error.is_none());
    }
}
