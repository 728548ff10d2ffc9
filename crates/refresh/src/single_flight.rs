//! Per-key deduplication of in-flight async work.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::errors::{RefreshError, Result};

type SharedOutput<V> = Shared<BoxFuture<'static, std::result::Result<V, String>>>;

/// At most one outstanding operation per key.
///
/// Callers asking for a key that is already in flight await the same
/// operation instead of starting a second one. Work runs on its own task, so
/// it completes even if every caller goes away, and its entry is removed when
/// it finishes whatever the outcome.
pub struct SingleFlight<K, V>
where
    K: Eq + Hash,
{
    in_flight: Arc<DashMap<K, SharedOutput<V>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Join the in-flight operation for `key`, or start one with `start`.
    ///
    /// `start` is only called when nothing is in flight for `key`.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let shared = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let work = start();
                let in_flight = Arc::clone(&self.in_flight);
                let handle = tokio::spawn(async move {
                    let output = work.await;
                    in_flight.remove(&key);
                    output
                });

                let shared = async move { handle.await.map_err(|e| e.to_string()) }
                    .boxed()
                    .shared();
                entry.insert(shared.clone());
                shared
            }
        };

        shared.await.map_err(RefreshError::Aborted)
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
