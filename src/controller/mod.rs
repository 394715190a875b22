//! Pod-centric backup coverage controller
//!
//! Pod notifications enqueue the pod key. Workers dequeue keys, re-derive
//! the pod's missing volumes from the cache and bring the per-owner
//! missing-volume series in line. Deleted pods are looked up in a
//! tombstone store so their contribution can be retracted.

pub mod queue;
pub mod rate_limiter;

use crate::backup::{missing_volumes, AnnotationKeys, OwnerIdentity};
use crate::error::handle_error;
use crate::k8s::store::{ObjectCache, ObjectStore};
use crate::k8s::types::{PodSnapshot, TrackedObject};
use crate::k8s::watcher::{wait_for_cache_sync, ResourceEventHandler, SyncSignal};
use crate::metrics::MissingVolumeMetrics;
use crate::{BackupMonitorError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use queue::WorkQueue;

/// Sync attempts per key before it is dropped
pub const MAX_SYNC_ATTEMPTS: u32 = 5;

/// Feeds pod notifications into the work queue
pub struct PodEventHandler {
    queue: Arc<WorkQueue>,
    tombstones: ObjectStore,
}

impl PodEventHandler {
    pub fn new(queue: Arc<WorkQueue>, tombstones: ObjectStore) -> Self {
        Self { queue, tombstones }
    }
}

impl ResourceEventHandler for PodEventHandler {
    fn on_add(&self, obj: &TrackedObject) {
        let key = obj.key();
        self.tombstones.delete(&key);
        self.queue.add(&key);
    }

    fn on_update(&self, _old: &TrackedObject, new: &TrackedObject) {
        self.queue.add(&new.key());
    }

    fn on_delete(&self, obj: &TrackedObject) {
        self.tombstones.add(obj.clone());
        self.queue.add(&obj.key());
    }
}

pub struct Controller {
    cache: Arc<dyn ObjectCache>,
    tombstones: ObjectStore,
    queue: Arc<WorkQueue>,
    metrics: Arc<MissingVolumeMetrics>,
    annotations: AnnotationKeys,
    synced: Vec<SyncSignal>,
}

impl Controller {
    pub fn new(
        cache: Arc<dyn ObjectCache>,
        tombstones: ObjectStore,
        queue: Arc<WorkQueue>,
        metrics: Arc<MissingVolumeMetrics>,
        annotations: AnnotationKeys,
        synced: Vec<SyncSignal>,
    ) -> Self {
        Self {
            cache,
            tombstones,
            queue,
            metrics,
            annotations,
            synced,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<MissingVolumeMetrics> {
        &self.metrics
    }

    /// Handle one key. Returns `false` once the queue has shut down.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let result = self.validate_backup_annotations(&key);
        self.handle_err(result, &key);
        self.queue.done(&key);

        true
    }

    /// Bring the series contributed by pod `key` in line with its current state
    pub fn validate_backup_annotations(&self, key: &str) -> Result<()> {
        match self.cache.get_by_key(key)? {
            Some(obj) => {
                let pod = expect_pod(obj);
                let owner = OwnerIdentity::resolve(&pod);

                debug!(%key, "controlling backup config");
                let missing = missing_volumes(&pod, &self.annotations);
                if !missing.is_empty() {
                    info!(%key, %owner, volumes = ?missing, "backup missing, enabling metric");
                }
                self.metrics.assert_missing(&owner, key, &missing);
            }
            None => {
                info!(%key, "pod does not exist anymore");

                match self.tombstones.get_by_key(key)? {
                    Some(obj) => {
                        let pod = expect_pod(obj);
                        let owner = OwnerIdentity::resolve(&pod);

                        info!(%key, %owner, "disabling metric");
                        self.metrics.retract_subject(&owner, key);
                        self.tombstones.delete(key);
                    }
                    None => {
                        if self.metrics.retract_member(key) {
                            debug!(%key, "retracted series of pod without tombstone");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Retry policy: forget on success, requeue with backoff on failure,
    /// drop the key after the last allowed attempt.
    pub fn handle_err(&self, result: Result<()>, key: &str) {
        let err = match result {
            Ok(()) => {
                self.queue.forget(key);
                return;
            }
            Err(e) => e,
        };

        if self.queue.num_requeues(key) + 1 < MAX_SYNC_ATTEMPTS {
            info!(%key, "error syncing pod: {}", err);
            self.queue.add_rate_limited(key);
            return;
        }

        self.queue.forget(key);
        handle_error(&err);
        warn!(%key, "dropping pod out of the queue: {}", err);
    }

    /// Run `workers` workers until `cancel` fires.
    ///
    /// No key is processed before every cache has completed its initial
    /// listing; if that does not happen within `sync_timeout` the call fails.
    pub async fn run(
        self: Arc<Self>,
        workers: usize,
        sync_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!("Starting pod controller");

        if !wait_for_cache_sync(&self.synced, sync_timeout, &cancel).await {
            self.queue.shutdown();
            if cancel.is_cancelled() {
                info!("Stopped before caches synced");
                return Ok(());
            }
            let err = BackupMonitorError::CacheSyncTimeout;
            handle_error(&err);
            return Err(err);
        }

        let handles: Vec<_> = (0..workers.max(1))
            .map(|id| {
                let controller = Arc::clone(&self);
                tokio::spawn(async move {
                    debug!(worker = id, "worker started");
                    while controller.process_next_item().await {}
                    debug!(worker = id, "worker stopped");
                })
            })
            .collect();

        cancel.cancelled().await;
        info!("Stopping pod controller");
        self.queue.shutdown();

        for handle in futures::future::join_all(handles).await {
            if let Err(e) = handle {
                warn!("worker task failed: {}", e);
            }
        }

        Ok(())
    }
}

fn expect_pod(obj: TrackedObject) -> PodSnapshot {
    match obj {
        TrackedObject::Pod(pod) => pod,
        other => unreachable!("pod controller received a {} object", other.kind()),
    }
}
