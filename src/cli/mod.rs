pub mod commands;

use crate::backup::{AnnotationKeys, DEFAULT_BACKUP_ANNOTATION, DEFAULT_EXCLUDE_ANNOTATION};
use crate::metrics::exporter::{HEALTHZ_PATH, READYZ_PATH};
use clap::{Args, Command, FromArgMatches, Parser, Subcommand};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "backupmonitor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reports Kubernetes volumes without a Velero backup or exclude annotation", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Settings shared by both modes. Environment names match the ones
/// existing deployments already set.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    #[arg(long, env = "METRICSPATH", default_value = "/metrics", global = true, value_parser = parse_metrics_path, help = "HTTP path serving metrics")]
    pub metrics_path: String,

    #[arg(long, env = "PORT", default_value_t = 2112, global = true, help = "HTTP listen port")]
    pub port: u16,

    #[arg(long, env = "BACKUPANNOTATION", default_value = DEFAULT_BACKUP_ANNOTATION, global = true, help = "Pod annotation listing backed up volumes")]
    pub backup_annotation: String,

    #[arg(long, env = "EXCLUDEANNOTATION", default_value = DEFAULT_EXCLUDE_ANNOTATION, global = true, help = "Pod annotation listing excluded volumes")]
    pub exclude_annotation: String,
}

impl Config {
    pub fn annotation_keys(&self) -> AnnotationKeys {
        AnnotationKeys {
            backup: self.backup_annotation.clone(),
            exclude: self.exclude_annotation.clone(),
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    #[command(about = "Watch pods and report missing volumes per owner (default)")]
    Controller(ControllerArgs),

    #[command(about = "Report missing persistent volume claims, recomputed on every scrape")]
    PvcWatcher(PvcWatcherArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ControllerArgs {
    #[arg(long, env = "THREADS", default_value_t = 1, help = "Number of reconcile workers")]
    pub threads: usize,

    #[arg(long, env = "SYNC_TIMEOUT_SECS", default_value_t = 120, help = "Seconds to wait for the initial cache sync")]
    pub sync_timeout_secs: u64,
}

impl ControllerArgs {
    /// Arguments for the default mode when no subcommand was given, still
    /// honouring the environment
    pub fn from_env() -> Result<Self, clap::Error> {
        let matches = Self::augment_args(Command::new("backupmonitor"))
            .try_get_matches_from(["backupmonitor"])?;
        Self::from_arg_matches(&matches)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

/// The metrics path shares the router with the health probes
fn parse_metrics_path(path: &str) -> Result<String, String> {
    if !path.starts_with('/') {
        return Err(format!("metrics path must start with '/', got {:?}", path));
    }
    if path == HEALTHZ_PATH || path == READYZ_PATH {
        return Err(format!("{} is reserved for health probes", path));
    }
    Ok(path.to_string())
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct PvcWatcherArgs {
    #[arg(long, env = "SYNC_TIMEOUT_SECS", default_value_t = 120, help = "Seconds to wait for the initial cache sync")]
    pub sync_timeout_secs: u64,
}

impl PvcWatcherArgs {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["backupmonitor"]).unwrap();

        assert_eq!(cli.config.metrics_path, "/metrics");
        assert_eq!(cli.config.annotation_keys(), AnnotationKeys::default());
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_controller_flags() {
        let cli = Cli::try_parse_from([
            "backupmonitor",
            "controller",
            "--threads",
            "4",
            "--port",
            "9000",
        ])
        .unwrap();

        assert_eq!(cli.config.port, 9000);
        match cli.command {
            Some(Commands::Controller(args)) => {
                assert_eq!(args.threads, 4);
                assert_eq!(args.sync_timeout(), Duration::from_secs(120));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_metrics_path_validation() {
        for path in ["metrics", "/healthz", "/readyz"] {
            let res = Cli::try_parse_from(["backupmonitor", "--metrics-path", path]);
            assert!(res.is_err(), "{} should be rejected", path);
        }

        let cli = Cli::try_parse_from(["backupmonitor", "--metrics-path", "/custom/metrics"]).unwrap();
        assert_eq!(cli.config.metrics_path, "/custom/metrics");
    }

    #[test]
    fn test_default_mode_rejects_invalid_env() {
        std::env::set_var("THREADS", "abc");
        let res = ControllerArgs::from_env();
        std::env::remove_var("THREADS");

        let err = res.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_pvc_watcher_annotation_override() {
        let cli = Cli::try_parse_from([
            "backupmonitor",
            "--exclude-annotation",
            "example.com/skip",
            "pvc-watcher",
        ])
        .unwrap();

        assert_eq!(cli.config.annotation_keys().exclude, "example.com/skip");
        assert!(matches!(cli.command, Some(Commands::PvcWatcher(_))));
    }
}
