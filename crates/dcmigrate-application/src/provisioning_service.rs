//! Drives the provisioning phase.

use dcmigrate_core::error::{DcmError, Result};
use dcmigrate_core::provisioning::{
    InfrastructureDeploymentStatus, ProvisioningBackend, ProvisioningConfig, StackId,
};
use dcmigrate_core::stage::{MigrationContext, MigrationStage, MigrationStageMachine};
use std::sync::Arc;
use std::time::Duration;

/// How [`ProvisioningService::await_stack`] ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackOutcome {
    /// The stack finished and the machine moved to the next stage.
    Ready,
    /// The migration left the wait stage by other means, e.g. a force reset.
    Abandoned { observed: MigrationStage },
}

pub struct ProvisioningService {
    machine: Arc<MigrationStageMachine>,
    backend: Arc<dyn ProvisioningBackend>,
    poll_interval: Duration,
}

impl ProvisioningService {
    pub fn new(
        machine: Arc<MigrationStageMachine>,
        backend: Arc<dyn ProvisioningBackend>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            machine,
            backend,
            poll_interval,
        }
    }

    /// Submits the application stack and moves to
    /// `provision_application_wait`.
    ///
    /// Entered from `authentication`, or resumed in `provision_application`
    /// if no stack was submitted there yet. A submission failure moves the
    /// migration to `provisioning_error`.
    ///
    /// # Errors
    ///
    /// A conflict if another caller already submitted the stack for this
    /// migration; the backend is not called again.
    pub async fn provision_application(&self, config: &ProvisioningConfig) -> Result<StackId> {
        let stage = MigrationStage::ProvisionApplication;
        self.enter(MigrationStage::Authentication, stage).await?;
        self.claim_submission(stage).await?;
        let stack_id = self.submit(stage, config).await?;

        let recorded = stack_id.0.clone();
        self.machine
            .transition_from_with_update(stage, MigrationStage::ProvisionApplicationWait, |ctx| {
                ctx.application_stack_id = Some(recorded)
            })
            .await?;
        Ok(stack_id)
    }

    /// Submits the migration stack and moves to
    /// `provision_migration_stack_wait`.
    ///
    /// Entered from `provision_application_wait`, or from
    /// `provision_migration_stack` when [`await_stack`](Self::await_stack)
    /// already advanced there. Submits at most once per migration, like
    /// [`provision_application`](Self::provision_application).
    pub async fn provision_migration_stack(&self, config: &ProvisioningConfig) -> Result<StackId> {
        let stage = MigrationStage::ProvisionMigrationStack;
        self.enter(MigrationStage::ProvisionApplicationWait, stage).await?;
        self.claim_submission(stage).await?;
        let stack_id = self.submit(stage, config).await?;

        let recorded = stack_id.0.clone();
        self.machine
            .transition_from_with_update(stage, MigrationStage::ProvisionMigrationStackWait, |ctx| {
                ctx.migration_stack_id = Some(recorded)
            })
            .await?;
        Ok(stack_id)
    }

    /// Polls the stack while the stored stage stays the one it was called
    /// in. On completion moves to `next`; on failure moves to
    /// `provisioning_error` with the backend's reason.
    pub async fn await_stack(&self, stack_id: &StackId, next: MigrationStage) -> Result<StackOutcome> {
        let wait_stage = self.machine.refresh().await?;
        loop {
            match self.backend.stack_status(stack_id).await? {
                InfrastructureDeploymentStatus::InProgress => {
                    tracing::debug!(%stack_id, "Stack still provisioning");
                    tokio::time::sleep(self.poll_interval).await;
                    let observed = self.machine.refresh().await?;
                    if observed != wait_stage {
                        tracing::info!(%stack_id, %wait_stage, %observed, "Left wait stage, no longer watching stack");
                        return Ok(StackOutcome::Abandoned { observed });
                    }
                }
                InfrastructureDeploymentStatus::Complete => {
                    tracing::info!(%stack_id, "Stack provisioned");
                    return match self.machine.transition_from(wait_stage, next).await {
                        Ok(()) => Ok(StackOutcome::Ready),
                        Err(e) if e.is_invalid_transition() => {
                            let observed = self.machine.current_stage();
                            if observed != wait_stage {
                                Ok(StackOutcome::Abandoned { observed })
                            } else {
                                Err(e)
                            }
                        }
                        Err(e) => Err(e),
                    };
                }
                InfrastructureDeploymentStatus::Failed { reason } => {
                    return Err(self
                        .fail(wait_stage, format!("Stack {} failed: {}", stack_id, reason))
                        .await);
                }
            }
        }
    }

    /// Moves from `from` to `stage`. Already being in `stage` counts as
    /// resuming it; the submission claim decides whether that is allowed.
    async fn enter(&self, from: MigrationStage, stage: MigrationStage) -> Result<()> {
        match self.machine.transition_from(from, stage).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_invalid_transition() && self.machine.current_stage() == stage => {
                tracing::info!(%stage, "Resuming provisioning stage");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Records in the stored context that the stack for `stage` is about to
    /// be submitted. Exactly one caller per migration gets past this.
    async fn claim_submission(&self, stage: MigrationStage) -> Result<()> {
        self.machine
            .try_update_context_in(stage, move |ctx| {
                if ctx.submitted_stacks.contains(&stage) {
                    return Err(DcmError::conflict(format!(
                        "Stack for `{}` was already submitted in migration `{}`",
                        stage, ctx.migration_id
                    )));
                }
                ctx.submitted_stacks.push(stage);
                Ok(())
            })
            .await
            .map(|_| ())
    }

    async fn submit(&self, stage: MigrationStage, config: &ProvisioningConfig) -> Result<StackId> {
        tracing::info!(
            stack_name = config.stack_name(),
            template = config.template_url(),
            "Submitting stack"
        );
        match self.backend.create_stack(config).await {
            Ok(stack_id) => Ok(stack_id),
            Err(e) => Err(self
                .fail(stage, format!("Failed to create stack {}: {}", config.stack_name(), e))
                .await),
        }
    }

    /// Moves from `from` to `provisioning_error`, recording `reason`, and
    /// returns the error to surface.
    async fn fail(&self, from: MigrationStage, reason: String) -> DcmError {
        tracing::error!("{}", reason);
        let recorded = reason.clone();
        let update = |ctx: &mut MigrationContext| ctx.last_error = Some(recorded);
        if let Err(e) = self
            .machine
            .transition_from_with_update(from, MigrationStage::ProvisioningError, update)
            .await
        {
            tracing::error!("Could not record provisioning failure: {}", e);
        }
        DcmError::provisioning(reason)
    }
}
