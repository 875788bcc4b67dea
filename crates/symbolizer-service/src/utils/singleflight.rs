//! De-duplication of concurrent computations by key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use tokio::task::AbortHandle;

use crate::caching::{CacheEntry, CacheError};

type ComputationChannel<T> = Shared<oneshot::Receiver<CacheEntry<T>>>;
type ComputationMap<T> = Arc<Mutex<HashMap<String, InFlight<T>>>>;

struct InFlight<T> {
    generation: u64,
    channel: ComputationChannel<T>,
    guard: Weak<FlightGuard<T>>,
}

/// Aborts the computation once the last waiter is gone.
struct FlightGuard<T> {
    handle: AbortHandle,
    key: String,
    generation: u64,
    inflight: ComputationMap<T>,
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        self.handle.abort();
        remove_entry(&self.inflight, &self.key, self.generation);
    }
}

fn remove_entry<T>(inflight: &Mutex<HashMap<String, InFlight<T>>>, key: &str, generation: u64) {
    let mut inflight = inflight.lock().unwrap_or_else(PoisonError::into_inner);
    if inflight.get(key).is_some_and(|e| e.generation == generation) {
        inflight.remove(key);
    }
}

/// Runs at most one computation per key at a time.
///
/// Callers that ask for a key while a computation for it is in flight wait for that
/// computation and receive a clone of its result. The computation runs as its own tokio task
/// and is aborted as soon as every waiter has been dropped.
pub struct SingleFlight<T> {
    inflight: ComputationMap<T>,
    next_generation: AtomicU64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            inflight: Default::default(),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<T> SingleFlight<T> {
    /// The number of computations currently in flight.
    pub fn len(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("inflight", &self.len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the result of `compute`, or of the computation already running for `key`.
    ///
    /// `compute` is only polled when no computation for `key` is in flight.
    pub async fn run<F>(&self, key: &str, compute: F) -> CacheEntry<T>
    where
        F: Future<Output = CacheEntry<T>> + Send + 'static,
    {
        let (channel, guard) = self.join_or_spawn(key, compute);
        let result = channel.await.unwrap_or(Err(CacheError::Canceled));
        drop(guard);
        result
    }

    fn join_or_spawn<F>(&self, key: &str, compute: F) -> (ComputationChannel<T>, Arc<FlightGuard<T>>)
    where
        F: Future<Output = CacheEntry<T>> + Send + 'static,
    {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = inflight.get(key) {
            if let Some(guard) = entry.guard.upgrade() {
                return (entry.channel.clone(), guard);
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();

        let task_inflight = Arc::clone(&self.inflight);
        let task_key = key.to_owned();
        let handle = tokio::spawn(async move {
            let result = compute.await;
            remove_entry(&task_inflight, &task_key, generation);
            sender.send(result).ok();
        })
        .abort_handle();

        let guard = Arc::new(FlightGuard {
            handle,
            key: key.to_owned(),
            generation,
            inflight: Arc::clone(&self.inflight),
        });
        let channel = receiver.shared();

        inflight.insert(
            key.to_owned(),
            InFlight {
                generation,
                channel: channel.clone(),
                guard: Arc::downgrade(&guard),
            },
        );

        (channel, guard)
    }
}
