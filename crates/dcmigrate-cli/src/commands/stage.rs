use anyhow::{Result, bail};
use dcmigrate_application::MigrationStatusView;
use dcmigrate_core::MigrationStage;
use dcmigrate_infrastructure::MigrationSettings;
use std::fmt::Write as _;

use super::open_service;

pub async fn status(settings: &MigrationSettings, json: bool) -> Result<()> {
    let service = open_service(settings).await?;
    let view = service.status_view();

    if json {
        println!("{}", view.to_json_pretty()?);
        return Ok(());
    }

    print!("{}", render_status(&view));
    Ok(())
}

/// Human-readable status, using the same stage and status names as the
/// JSON document.
fn render_status(view: &MigrationStatusView) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Migration:  {}", view.migration_id);
    let _ = writeln!(out, "Stage:      {} ({})", view.stage, view.phase);
    let _ = writeln!(out, "Database:   {}", view.database_status);
    let _ = writeln!(out, "In stage:   {}s", view.elapsed_seconds);
    if let Some(error) = &view.last_error {
        let _ = writeln!(out, "Last error: {}", error);
    }
    if view.recovery.needs_reset() {
        let _ = writeln!(
            out,
            "\nThe migration has failed. Run `dcmigrate reset --force` to start over."
        );
    }
    out
}

pub async fn transition(settings: &MigrationSettings, stage: MigrationStage) -> Result<()> {
    let service = open_service(settings).await?;
    let from = service.current_stage();
    service.transition(stage).await?;
    println!("{} -> {}", from, stage);
    Ok(())
}

pub async fn reset(settings: &MigrationSettings, force: bool, reason: &str) -> Result<()> {
    if !force {
        bail!("Refusing to reset the migration without --force");
    }
    let service = open_service(settings).await?;
    let previous = service.force_reset(reason).await?;
    println!("Reset from {} to {}", previous, MigrationStage::NotStarted);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcmigrate_core::stage::MigrationRecord;
    use std::time::Duration;

    #[test]
    fn test_render_status_uses_display_names() {
        let record = MigrationRecord::new();
        let view = MigrationStatusView::from_record(&record, Duration::from_secs(3));

        let text = render_status(&view);

        assert!(text.contains("Stage:      not_started (pre_flight)"), "{text}");
        assert!(text.contains("Database:   NOT_STARTED\n"), "{text}");
        assert!(!text.contains("NotStarted"));
        assert!(text.contains("In stage:   3s"));
    }

    #[test]
    fn test_render_status_points_failed_migrations_at_reset() {
        let mut record = MigrationRecord::new().advanced_to(MigrationStage::FinalSyncError);
        record.context.last_error = Some("queue purged".to_string());
        let view = MigrationStatusView::from_record(&record, Duration::ZERO);

        let text = render_status(&view);

        assert!(text.contains("Database:   FAILED"));
        assert!(text.contains("Last error: queue purged"));
        assert!(text.contains("dcmigrate reset --force"));
    }
}
