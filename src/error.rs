use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum BackupMonitorError {
    #[error("Kubernetes error: {0}")]
    KubernetesError(String),

    #[error("Watch stream error: {0}")]
    WatchError(#[from] kube::runtime::watcher::Error),

    #[error("Cache lookup failed for {key}: {reason}")]
    CacheError { key: String, reason: String },

    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Timed out waiting for caches to sync")]
    CacheSyncTimeout,
}

pub type Result<T> = std::result::Result<T, BackupMonitorError>;

/// Process-wide sink for errors nobody else is going to act on.
///
/// Reporting is never fatal: the caller keeps running after handing the
/// error over.
pub fn handle_error(err: &BackupMonitorError) {
    error!(error = %err, "unhandled error");
}
