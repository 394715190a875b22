use anyhow::Context;
use backupmonitor::cli::{commands, Cli, Commands, ControllerArgs};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Starting backupmonitor v{}", backupmonitor::VERSION);

    let command = match cli.command {
        Some(command) => command,
        None => Commands::Controller(ControllerArgs::from_env().unwrap_or_else(|e| e.exit())),
    };

    commands::handle_command(cli.config, command)
        .await
        .context("backupmonitor stopped with an error")
}
