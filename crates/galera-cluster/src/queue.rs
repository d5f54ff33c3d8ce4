//! Deduplicating, rate-limited work queue of cluster keys.
//!
//! Event handlers push `namespace/name` keys; workers pull them one at a
//! time. The queue guarantees:
//!
//! - a key is queued at most once, no matter how often it is added
//! - a key handed to a worker is not handed to any other worker until that
//!   worker calls [`WorkQueue::done`]; re-adds during processing are parked
//!   and released by `done`
//! - after [`WorkQueue::shutdown`], `dequeue` stops yielding work
//!
//! Because of the second guarantee any number of workers can share one queue
//! without further locking per cluster.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::trace;

use crate::rate_limiter::{ItemExponentialBackoff, RateLimiterConfig};

#[derive(Debug)]
struct State<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be processed (queued, or parked behind processing)
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner<K> {
    name: String,
    state: Mutex<State<K>>,
    notify: Notify,
    limiter: ItemExponentialBackoff<K>,
}

/// Cloneable handle to a shared work queue.
#[derive(Debug)]
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    /// Create an empty queue; `name` only shows up in logs.
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                limiter: ItemExponentialBackoff::new(config),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        self.inner.state.lock()
    }

    /// Add `key` immediately.
    ///
    /// No-op if the key is already waiting. If a worker currently holds the
    /// key it is parked and queued again once that worker calls `done`.
    pub fn add(&self, key: K) {
        {
            let mut state = self.state();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }
            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                trace!(queue = %self.inner.name, ?key, "parked behind in-flight processing");
                return;
            }
            state.queue.push_back(key);
        }
        self.inner.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Add `key` subject to its per-key backoff.
    pub fn enqueue(&self, key: K) {
        let delay = self.inner.limiter.when(&key);
        self.add_after(key, delay);
    }

    /// Re-enqueue `key` after a failed attempt, with increased backoff.
    pub fn retry(&self, key: K) {
        self.enqueue(key);
    }

    /// Reset the backoff of `key` after a successful attempt.
    pub fn forget(&self, key: &K) {
        self.inner.limiter.forget(key);
    }

    /// How many times `key` has been re-enqueued since it was last forgotten
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Wait for the next key.
    ///
    /// Returns `None` once the queue is shutting down. The caller owns the
    /// key until it calls [`WorkQueue::done`].
    pub async fn dequeue(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent add or
            // shutdown cannot slip between the check and the wait.
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release `key` after processing; re-queues it if it was re-added meanwhile.
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.state();
            state.processing.remove(key);
            if state.dirty.contains(key) && !state.shutting_down {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    /// Stop handing out work and wake every waiting worker.
    pub fn shutdown(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    /// Whether `shutdown` has been called
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of keys ready to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// True when no key is ready to be handed out
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
