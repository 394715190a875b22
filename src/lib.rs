pub mod backup;
pub mod cli;
pub mod controller;
pub mod error;
pub mod k8s;
pub mod metrics;
pub mod pvc_watcher;

pub use error::{BackupMonitorError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
