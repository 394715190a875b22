//! Deduplicating work queue for object keys
//!
//! Guarantees:
//! - a key waiting in the queue is stored once, however often it is added
//! - a key handed out by [`WorkQueue::get`] is not handed out again before
//!   [`WorkQueue::done`]; adds in the meantime are replayed on `done`
//! - after [`WorkQueue::shutdown`] new adds are ignored, queued keys are
//!   still drained and `get` then returns `None`

use crate::controller::rate_limiter::ExponentialBackoff;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    rate_limiter: ExponentialBackoff,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::with_rate_limiter(ExponentialBackoff::default())
    }

    pub fn with_rate_limiter(rate_limiter: ExponentialBackoff) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            rate_limiter,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, key: &str) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }

        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            return;
        }

        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has passed
    pub fn add_after(self: &Arc<Self>, key: &str, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }

    /// Add `key` after the delay its failure history calls for
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) {
        let delay = self.rate_limiter.when(key);
        trace!(%key, ?delay, "requeue rate limited");
        self.add_after(key, delay);
    }

    /// Wait for the next key. `None` means the queue is shut down and empty.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as no longer being processed
    pub fn done(&self, key: &str) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Drop the failure history of `key`
    pub fn forget(&self, key: &str) {
        self.rate_limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.rate_limiter.num_requeues(key)
    }

    /// Keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        self.state().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_deduplicates_waiting_keys() {
        let queue = WorkQueue::new();
        queue.add("ns/a");
        queue.add("ns/b");
        queue.add("ns/a");

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await.as_deref(), Some("ns/a"));
        assert_eq!(queue.get().await.as_deref(), Some("ns/b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_key_readded_while_processing_waits_for_done() {
        let queue = WorkQueue::new();
        queue.add("ns/a");

        let key = queue.get().await.unwrap();
        queue.add("ns/a");
        assert!(queue.is_empty());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("ns/a"));
    }

    #[tokio::test]
    async fn test_get_wakes_on_add() {
        let queue = Arc::new(WorkQueue::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add("ns/a");

        assert_eq!(waiter.await.unwrap().as_deref(), Some("ns/a"));
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_quits() {
        let queue = Arc::new(WorkQueue::new());
        queue.add("ns/a");
        queue.shutdown();
        queue.add("ns/b");

        assert_eq!(queue.get().await.as_deref(), Some("ns/a"));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_blocked_getters() {
        let queue = Arc::new(WorkQueue::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown();

        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_rate_limited_delays_key() {
        let queue = Arc::new(WorkQueue::new());

        queue.add_rate_limited("ns/a");
        assert!(queue.is_empty());
        assert_eq!(queue.num_requeues("ns/a"), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.len(), 1);

        queue.forget("ns/a");
        assert_eq!(queue.num_requeues("ns/a"), 0);
    }
}
