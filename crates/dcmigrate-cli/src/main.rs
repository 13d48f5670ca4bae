use anyhow::Result;
use clap::{Parser, Subcommand};
use dcmigrate_core::MigrationStage;
use dcmigrate_infrastructure::MigrationSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "dcmigrate")]
#[command(about = "Operator tool for server to cloud migrations", long_about = None)]
struct Cli {
    /// Settings file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current migration stage
    Status {
        /// Print the full status document as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move the migration to another stage
    Transition { stage: MigrationStage },
    /// Abandon the current migration and return to not_started
    Reset {
        #[arg(long)]
        force: bool,
        #[arg(long, default_value = "operator reset")]
        reason: String,
    },
    /// Print the number of pending messages in a queue
    QueueLength { name: String },
    /// Wait for a queue to drain, then leave the wait stage
    AwaitDrain {
        queue: String,
        #[arg(long)]
        wait_stage: MigrationStage,
        #[arg(long)]
        next_stage: MigrationStage,
    },
    /// Print the flattened parameters of a provisioning config file
    RenderParams { file: PathBuf },
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = MigrationSettings::load(cli.config.as_deref())?;
    init_tracing(&settings.log_filter);

    match cli.command {
        Commands::Status { json } => commands::stage::status(&settings, json).await?,
        Commands::Transition { stage } => commands::stage::transition(&settings, stage).await?,
        Commands::Reset { force, reason } => commands::stage::reset(&settings, force, &reason).await?,
        Commands::QueueLength { name } => commands::queue::length(&settings, &name).await?,
        Commands::AwaitDrain {
            queue,
            wait_stage,
            next_stage,
        } => commands::queue::await_drain(&settings, &queue, wait_stage, next_stage).await?,
        Commands::RenderParams { file } => commands::params::render(&file)?,
    }

    Ok(())
}
