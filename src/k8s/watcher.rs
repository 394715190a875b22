//! List/watch delivery for the watched kinds
//!
//! A [`ResourceWatcher`] keeps an [`ObjectStore`] in line with the cluster
//! and forwards every change to an optional [`ResourceEventHandler`]. Each
//! (re)list is applied as a replace, so deletions missed while the stream
//! was down are delivered once the next listing completes.

use crate::k8s::store::{Delta, ObjectStore};
use crate::k8s::types::TrackedObject;
use crate::Result;
use futures::{StreamExt, TryStreamExt};
use kube::runtime::watcher::{self, Event};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receives store changes as they are applied
pub trait ResourceEventHandler: Send + Sync {
    fn on_add(&self, obj: &TrackedObject);
    fn on_update(&self, old: &TrackedObject, new: &TrackedObject);
    fn on_delete(&self, obj: &TrackedObject);
}

/// One-way flag raised once the first full listing has been applied
#[derive(Clone)]
pub struct SyncSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl SyncSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn mark_synced(&self) {
        self.tx.send_replace(true);
    }

    pub fn has_synced(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has been raised
    pub async fn synced(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|synced| *synced).await;
    }
}

impl Default for SyncSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until every signal is raised.
///
/// Returns `false` when the timeout elapses or the token is cancelled first.
pub async fn wait_for_cache_sync(
    signals: &[SyncSignal],
    timeout: Duration,
    cancel: &CancellationToken,
) -> bool {
    let all = futures::future::join_all(signals.iter().map(|s| s.synced()));

    tokio::select! {
        _ = cancel.cancelled() => false,
        res = tokio::time::timeout(timeout, all) => res.is_ok(),
    }
}

/// Applies raw watch events to a store and dispatches the resulting deltas
pub struct EventApplier {
    store: ObjectStore,
    handler: Option<Arc<dyn ResourceEventHandler>>,
    synced: SyncSignal,
    relist: Mutex<Option<Vec<TrackedObject>>>,
}

impl EventApplier {
    pub fn new(store: ObjectStore, handler: Option<Arc<dyn ResourceEventHandler>>) -> Self {
        Self {
            store,
            handler,
            synced: SyncSignal::new(),
            relist: Mutex::new(None),
        }
    }

    pub fn apply<K>(&self, event: Event<K>)
    where
        for<'a> TrackedObject: From<&'a K>,
    {
        match event {
            Event::Init => {
                debug!("Relist started");
                *self.relist_buffer() = Some(Vec::new());
            }
            Event::InitApply(obj) => {
                self.relist_buffer()
                    .get_or_insert_with(Vec::new)
                    .push(TrackedObject::from(&obj));
            }
            Event::InitDone => {
                let objects = self.relist_buffer().take().unwrap_or_default();
                for delta in self.store.replace(objects) {
                    self.dispatch(delta);
                }
                if !self.synced.has_synced() {
                    info!("Initial sync complete. Tracking {} objects", self.store.len());
                }
                self.synced.mark_synced();
            }
            Event::Apply(obj) => {
                let delta = self.store.add(TrackedObject::from(&obj));
                self.dispatch(delta);
            }
            Event::Delete(obj) => {
                let obj = TrackedObject::from(&obj);
                self.store.delete(&obj.key());
                self.dispatch(Delta::Deleted(obj));
            }
        }
    }

    fn dispatch(&self, delta: Delta) {
        let Some(handler) = &self.handler else {
            return;
        };
        match &delta {
            Delta::Added(obj) => handler.on_add(obj),
            Delta::Updated { old, new } => handler.on_update(old, new),
            Delta::Deleted(obj) => handler.on_delete(obj),
        }
    }

    fn relist_buffer(&self) -> std::sync::MutexGuard<'_, Option<Vec<TrackedObject>>> {
        self.relist.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn sync_signal(&self) -> SyncSignal {
        self.synced.clone()
    }
}

/// Watches every object of one kind across the cluster
pub struct ResourceWatcher<K> {
    api: Api<K>,
    applier: EventApplier,
}

impl<K> ResourceWatcher<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    for<'a> TrackedObject: From<&'a K>,
{
    pub fn new(api: Api<K>, store: ObjectStore) -> Self {
        Self {
            api,
            applier: EventApplier::new(store, None),
        }
    }

    pub fn with_handler(api: Api<K>, store: ObjectStore, handler: Arc<dyn ResourceEventHandler>) -> Self {
        Self {
            api,
            applier: EventApplier::new(store, Some(handler)),
        }
    }

    pub fn store(&self) -> &ObjectStore {
        self.applier.store()
    }

    pub fn sync_signal(&self) -> SyncSignal {
        self.applier.sync_signal()
    }

    /// Watch until cancelled, reconnecting with backoff on stream errors
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let kind = K::kind(&());
        info!(%kind, "Starting watcher");

        let mut backoff = Duration::from_secs(1);
        let max_backoff = Duration::from_secs(30);

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.watch() => res,
            };

            match outcome {
                Ok(()) => {
                    warn!(%kind, "Watch stream ended, reconnecting...");
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    error!(%kind, "Watch failed: {}, reconnecting in {:?}", e, backoff);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = std::cmp::min(backoff * 2, max_backoff);
                }
            }
        }

        info!(%kind, "Watcher stopped");
        Ok(())
    }

    async fn watch(&self) -> Result<()> {
        let mut stream = watcher::watcher(self.api.clone(), watcher::Config::default()).boxed();

        while let Some(event) = stream.try_next().await? {
            self.applier.apply(event);
        }

        Ok(())
    }
}
