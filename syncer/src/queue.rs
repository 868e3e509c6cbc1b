//! A coalescing work queue keyed by object identity, guaranteeing a single
//! in-flight reconcile per key while allowing unlimited concurrency across
//! distinct keys.
//!
//! Modeled after the client-go/controller-runtime workqueue: a key queued
//! while its previous occurrence is still being processed is not queued
//! twice; instead it is marked dirty and automatically re-queued the moment
//! processing finishes, so "the most recent event wins" without ever
//! dropping a wakeup.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

struct State<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    processing: HashSet<K>,
    dirty: HashSet<K>,
    closed: bool,
}

/// A shared handle to the queue; clone it freely across worker tasks.
pub struct Queue<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

impl<K> Queue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Builds an empty, open queue.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                processing: HashSet::new(),
                dirty: HashSet::new(),
                closed: false,
            }),
            notify: Notify::new(),
        })
    }

    /// Enqueues `key`. A key already queued is coalesced (no-op); a key
    /// currently being processed is marked dirty and re-queued as soon as
    /// [`Queue::done`] is called for it.
    pub async fn add(self: &Arc<Self>, key: K) {
        let mut state = self.state.lock().await;
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.queue.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueues `key` after `delay`, for exponential-backoff requeues.
    /// Cancellation-safe: if the queue is closed before the delay elapses,
    /// the add is simply skipped.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !this.is_closed().await {
                this.add(key).await;
            }
        });
    }

    /// Blocks until a key is available or the queue is closed and drained.
    /// Marks the returned key as "processing"; callers must call
    /// [`Queue::done`] exactly once when finished.
    pub async fn pop(self: &Arc<Self>) -> Option<K> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks `key` as no longer processing. If it was marked dirty while it
    /// was processing, it is immediately re-queued.
    pub async fn done(self: &Arc<Self>, key: K) {
        let mut state = self.state.lock().await;
        state.processing.remove(&key);
        if state.dirty.remove(&key) {
            state.queued.insert(key.clone());
            state.queue.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Marks the queue closed; outstanding [`Queue::pop`] calls drain the
    /// remaining queue and then return `None`. Does not cancel in-flight
    /// reconciles.
    pub async fn close(self: &Arc<Self>) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    async fn is_closed(self: &Arc<Self>) -> bool {
        self.state.lock().await.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coalesces_duplicate_adds() {
        let queue: Arc<Queue<String>> = Queue::new();
        queue.add("a".to_owned()).await;
        queue.add("a".to_owned()).await;
        let key = queue.pop().await.unwrap();
        assert_eq!(key, "a");
        queue.close().await;
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn redelivers_dirty_key_after_done() {
        let queue: Arc<Queue<String>> = Queue::new();
        queue.add("a".to_owned()).await;
        let key = queue.pop().await.unwrap();
        // event arrives while "a" is in flight
        queue.add("a".to_owned()).await;
        queue.done(key).await;
        let redelivered = queue.pop().await.unwrap();
        assert_eq!(redelivered, "a");
    }

    #[tokio::test]
    async fn distinct_keys_are_both_delivered() {
        let queue: Arc<Queue<u32>> = Queue::new();
        queue.add(1).await;
        queue.add(2).await;
        let mut seen = vec![queue.pop().await.unwrap(), queue.pop().await.unwrap()];
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);
    }
}
