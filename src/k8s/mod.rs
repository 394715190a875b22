pub mod client;
pub mod store;
pub mod types;
pub mod watcher;

pub use client::K8sClient;
pub use store::{Delta, ObjectCache, ObjectStore};
pub use types::{NamespaceSnapshot, OwnerRef, PodSnapshot, PodVolume, PvcSnapshot, TrackedObject};
pub use watcher::{wait_for_cache_sync, ResourceEventHandler, ResourceWatcher, SyncSignal};
