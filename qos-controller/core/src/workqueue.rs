//! A deduplicating, rate-limited work queue.
//!
//! Items are identified by a key and carry a payload. While a key is waiting, later adds for the
//! same key are coalesced into its payload instead of queueing it twice. A key is never handed to
//! two workers at once: adds that arrive while a key is being processed are parked until the
//! worker marks it `done`, at which point the key is queued again.

mod metrics;
mod rate_limit;

pub use self::{metrics::QueueMetrics, rate_limit::FastSlow};

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use std::{collections::VecDeque, hash::Hash, sync::Arc, time::Duration};
use tokio::sync::Notify;
use tracing::trace;

/// Merges the payloads of repeated adds for one key.
pub trait Coalesce {
    fn coalesce(&mut self, later: Self);
}

pub struct WorkQueue<K, V = ()> {
    inner: Arc<Inner<K, V>>,
}

struct Inner<K, V> {
    name: String,
    limiter: FastSlow,
    state: Mutex<State<K, V>>,
    notify: Notify,
    metrics: metrics::Metrics,
}

struct State<K, V> {
    queue: VecDeque<K>,
    dirty: HashMap<K, V>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

// === impl Coalesce ===

impl Coalesce for () {
    fn coalesce(&mut self, _: ()) {}
}

impl<T> Coalesce for Vec<T> {
    fn coalesce(&mut self, mut later: Self) {
        self.append(&mut later);
    }
}

// === impl WorkQueue ===

impl<K, V> Clone for WorkQueue<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for WorkQueue<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl<K, V> WorkQueue<K, V>
where
    K: Clone + Eq + Hash,
    V: Coalesce,
{
    pub fn new(name: impl Into<String>, limiter: FastSlow, metrics: &QueueMetrics) -> Self {
        let name = name.into();
        let metrics = metrics.queue(&name);
        Self {
            inner: Arc::new(Inner {
                name,
                limiter,
                metrics,
                notify: Notify::new(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashMap::default(),
                    processing: HashSet::default(),
                    failures: HashMap::default(),
                    shutting_down: false,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Adds an item. Ignored once the queue is shutting down.
    pub fn add(&self, key: K, value: V) {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return;
        }
        self.inner.metrics.adds.inc();

        if let Some(pending) = state.dirty.get_mut(&key) {
            pending.coalesce(value);
            return;
        }
        state.dirty.insert(key.clone(), value);
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        self.inner.metrics.depth.set(state.queue.len() as i64);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Waits for the next item. Returns `None` once the queue has been shut down.
    ///
    /// The caller must call [`WorkQueue::done`] with the returned key when it finishes processing.
    pub async fn get(&self) -> Option<(K, V)> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return None;
                }
                while let Some(key) = state.queue.pop_front() {
                    let Some(value) = state.dirty.remove(&key) else {
                        continue;
                    };
                    state.processing.insert(key.clone());
                    self.inner.metrics.depth.set(state.queue.len() as i64);
                    return Some((key, value));
                }
            }

            notified.await;
        }
    }

    /// Marks a key as no longer being processed, re-queueing it if it was added in the meantime.
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.shutting_down || !state.dirty.contains_key(key) {
            return;
        }
        state.queue.push_back(key.clone());
        self.inner.metrics.depth.set(state.queue.len() as i64);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Clears the failure history of a key.
    pub fn forget(&self, key: &K) {
        self.inner.state.lock().failures.remove(key);
    }

    /// Clears the failure history of a key that exhausted its retries.
    pub fn drop_item(&self, key: &K) {
        self.forget(key);
        self.inner.metrics.drops.inc();
    }

    /// The number of times a key has been requeued since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner
            .state
            .lock()
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// The number of keys waiting to be handed to a worker.
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting items and wakes every blocked `get`. Waiting items are discarded.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shutting_down = true;
        state.queue.clear();
        state.dirty.clear();
        self.inner.metrics.depth.set(0);
        drop(state);
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }
}

impl<K, V> WorkQueue<K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Coalesce + Send + 'static,
{
    /// Adds an item once `delay` has elapsed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_after(&self, key: K, value: V, delay: Duration) {
        if delay.is_zero() {
            return self.add(key, value);
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key, value);
        });
    }

    /// Requeues an item after the delay its failure history calls for.
    pub fn add_rate_limited(&self, key: K, value: V) {
        let delay = {
            let mut state = self.inner.state.lock();
            let attempts = state.failures.entry(key.clone()).or_insert(0);
            *attempts += 1;
            self.inner.limiter.delay(*attempts)
        };
        trace!(queue = %self.inner.name, ?delay, "Requeueing");
        self.inner.metrics.retries.inc();
        self.add_after(key, value, delay);
    }
}
