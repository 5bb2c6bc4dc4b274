//! Deduplication of concurrent identical operations.
//!
//! The first caller for a key starts the work on a spawned task; every caller
//! arriving while it runs awaits the same shared result. The in-flight marker
//! is cleared when the work finishes, successful or not, so a failed run can
//! be retried. Started work is never cancelled by dropping a caller.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::trace;

use crate::error::{HostError, HostResult};
use crate::sync::lock;

type Flight<T> = Shared<BoxFuture<'static, HostResult<T>>>;

struct Entry<T> {
    generation: u64,
    flight: Flight<T>,
}

pub struct SingleFlight<K, T> {
    in_flight: Arc<Mutex<HashMap<K, Entry<T>>>>,
    generation: AtomicU64,
}

impl<K, T> Default for SingleFlight<K, T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a run is already in flight, in which case
    /// join it. `work` is only called when a new run starts.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> HostResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HostResult<T>> + Send + 'static,
    {
        let flight = {
            let mut map = lock(&self.in_flight);
            if let Some(entry) = map.get(&key) {
                trace!(key = ?key, "Joining in-flight operation");
                entry.flight.clone()
            } else {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let registry = self.in_flight.clone();
                let task_key = key.clone();
                let fut = work();
                let handle = tokio::spawn(async move {
                    let result = fut.await;
                    let mut map = lock(&registry);
                    if map.get(&task_key).map(|e| e.generation) == Some(generation) {
                        map.remove(&task_key);
                    }
                    result
                });
                let flight = async move {
                    handle.await.unwrap_or_else(|e| {
                        Err(HostError::Handler(format!("in-flight task aborted: {}", e)))
                    })
                }
                .boxed()
                .shared();
                map.insert(
                    key,
                    Entry {
                        generation,
                        flight: flight.clone(),
                    },
                );
                flight
            }
        };
        flight.await
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.in_flight).contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Drop the marker for `key` so the next caller starts a fresh run.
    /// The running work itself is left to finish.
    pub fn forget(&self, key: &K) -> bool {
        lock(&self.in_flight).remove(key).is_some()
    }

    /// `forget` every in-flight key matching `pred`.
    pub fn forget_where<P>(&self, pred: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let mut map = lock(&self.in_flight);
        let before = map.len();
        map.retain(|key, _| !pred(key));
        before - map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flights: Arc<SingleFlight<String, Arc<String>>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let flights = flights.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run("key".to_string(), move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(Arc::new("value".to_string()))
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(flights.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_clears_marker_for_retry() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let first = flights
            .run("k", || async { Err(HostError::Transport("offline".into())) })
            .await;
        assert!(first.is_err());
        assert!(!flights.is_in_flight(&"k"));

        let second = flights.run("k", || async { Ok(7) }).await;
        assert_eq!(second, Ok(7));
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_cancel_work() {
        let flights: Arc<SingleFlight<&'static str, u32>> = Arc::new(SingleFlight::new());
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        let f = flights.clone();
        let caller = tokio::spawn(async move {
            f.run("k", move || async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                d.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        caller.abort();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(!flights.is_in_flight(&"k"));
    }

    #[tokio::test]
    async fn test_forget_where_detaches_matching_runs() {
        let flights: Arc<SingleFlight<(&'static str, u8), u32>> = Arc::new(SingleFlight::new());
        for (remote, n) in [("shop", 1), ("shop", 2), ("cart", 1)] {
            let f = flights.clone();
            tokio::spawn(async move {
                f.run((remote, n), || async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(0)
                })
                .await
            });
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(flights.in_flight_count(), 3);

        assert_eq!(flights.forget_where(|(remote, _)| *remote == "shop"), 2);
        assert!(flights.is_in_flight(&("cart", 1)));
        assert!(!flights.is_in_flight(&("shop", 1)));
    }
}
