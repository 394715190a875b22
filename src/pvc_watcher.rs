//! PVC-centric variant
//!
//! Instead of reacting to events, every scrape walks the cached namespaces,
//! pods and claims and rebuilds the `{namespace, pvc_name}` gauge from
//! scratch.

use crate::backup::{missing_claims, AnnotationKeys, MissingClaim};
use crate::k8s::store::ObjectStore;
use crate::k8s::types::{PodSnapshot, PvcSnapshot, TrackedObject};
use crate::k8s::watcher::{wait_for_cache_sync, SyncSignal};
use crate::metrics::MissingClaimMetrics;
use crate::Result;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct PvcWatcher {
    pods: ObjectStore,
    pvcs: ObjectStore,
    namespaces: ObjectStore,
    annotations: AnnotationKeys,
    synced: Vec<SyncSignal>,
    metrics: Arc<MissingClaimMetrics>,
}

impl PvcWatcher {
    pub fn new(
        pods: ObjectStore,
        pvcs: ObjectStore,
        namespaces: ObjectStore,
        annotations: AnnotationKeys,
        synced: Vec<SyncSignal>,
    ) -> Result<Self> {
        Ok(Self {
            pods,
            pvcs,
            namespaces,
            annotations,
            synced,
            metrics: Arc::new(MissingClaimMetrics::new()?),
        })
    }

    /// Wait for the pod, claim and namespace caches.
    ///
    /// A timeout is only logged: scrapes keep answering with no series
    /// until the caches catch up.
    pub async fn wait_for_sync(&self, timeout: Duration, cancel: &CancellationToken) -> bool {
        let synced = wait_for_cache_sync(&self.synced, timeout, cancel).await;
        if synced {
            info!("PVC watcher caches synced");
        } else {
            warn!("Failed to sync PVC watcher caches within {:?}", timeout);
        }
        synced
    }

    pub fn is_synced(&self) -> bool {
        self.synced.iter().all(SyncSignal::has_synced)
    }

    /// Claims of `namespace` without a backup decision
    pub fn update(&self, namespace: &str) -> Vec<MissingClaim> {
        let pods: Vec<PodSnapshot> = self
            .pods
            .list_namespace(namespace)
            .into_iter()
            .map(|obj| match obj {
                TrackedObject::Pod(pod) => pod,
                other => unreachable!("pod cache holds a {} object", other.kind()),
            })
            .collect();

        let pvcs: Vec<PvcSnapshot> = self
            .pvcs
            .list_namespace(namespace)
            .into_iter()
            .map(|obj| match obj {
                TrackedObject::PersistentVolumeClaim(pvc) => pvc,
                other => unreachable!("claim cache holds a {} object", other.kind()),
            })
            .collect();

        missing_claims(namespace, &pods, &pvcs, &self.annotations)
    }

    /// Missing claims across every known namespace
    pub fn missing(&self) -> Vec<MissingClaim> {
        self.namespaces
            .list()
            .iter()
            .flat_map(|ns| self.update(&ns.key()))
            .collect()
    }

    pub fn metrics(&self) -> &MissingClaimMetrics {
        &self.metrics
    }
}

impl Collector for PvcWatcher {
    fn desc(&self) -> Vec<&Desc> {
        self.metrics.gauge().desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let missing = if self.is_synced() {
            self.missing()
        } else {
            debug!("Caches not synced yet, reporting no claims");
            Vec::new()
        };

        debug!(count = missing.len(), "Rebuilding missing claim series");
        self.metrics.full_rebuild(missing)
    }
}
