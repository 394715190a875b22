pub mod exporter;
pub mod state;

pub use exporter::PrometheusExporter;
pub use state::{MissingClaimMetrics, MissingVolume, MissingVolumeMetrics, MISSING_METRIC_NAME};

use crate::Result;
use prometheus::Registry;

/// Fresh registry, with process metrics where the platform supports them
pub fn new_registry() -> Result<Registry> {
    let registry = Registry::new();

    #[cfg(target_os = "linux")]
    registry.register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))?;

    Ok(registry)
}
