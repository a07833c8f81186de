//! Keyed single-flight cache
//!
//! Values are built at most once per key at a time. Concurrent callers for the
//! same key share the one in-flight build and all observe its result.
//! Successful values are kept for the life of the cache; failures are handed
//! to the callers that were waiting and then forgotten, so the next call
//! starts a fresh build. A build that panics counts as a failure.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::errors::AgentError;

type SharedBuild<V> = Shared<BoxFuture<'static, Result<V, Arc<AgentError>>>>;

struct Inner<K, V> {
    ready: RwLock<HashMap<K, V>>,
    in_flight: Mutex<HashMap<K, SharedBuild<V>>>,
}

/// In-memory cache with per-key single flight
pub struct FlightCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for FlightCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> Default for FlightCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FlightCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                ready: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get a completed value
    pub fn get(&self, key: &K) -> Option<V> {
        let ready = self.inner.ready.read().unwrap_or_else(|e| e.into_inner());
        ready.get(key).cloned()
    }

    /// Return the cached value for `key`, or run `build` to produce it.
    ///
    /// `build` only runs when no completed value exists and no other build
    /// for the key is in flight. The locks are never held while it runs.
    pub async fn get_or_try_insert_with<F, Fut>(
        &self,
        key: K,
        build: F,
    ) -> Result<V, Arc<AgentError>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, AgentError>> + Send + 'static,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let flight = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner());

            // a build may have finished between the read above and this lock
            if let Some(value) = self.get(&key) {
                return Ok(value);
            }

            match in_flight.get(&key) {
                Some(flight) => flight.clone(),
                None => {
                    let flight = self.start_build(key.clone(), build);
                    in_flight.insert(key, flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    fn start_build<F, Fut>(&self, key: K, build: F) -> SharedBuild<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, AgentError>> + Send + 'static,
    {
        let inner = self.inner.clone();
        async move {
            let result = match AssertUnwindSafe(async move { build().await })
                .catch_unwind()
                .await
            {
                Ok(result) => result.map_err(Arc::new),
                Err(_) => Err(Arc::new(AgentError::Internal("build panicked".to_string()))),
            };

            // publish before retiring the flight so no caller can miss both
            if let Ok(value) = &result {
                let mut ready = inner.ready.write().unwrap_or_else(|e| e.into_inner());
                ready.insert(key.clone(), value.clone());
            }
            let mut in_flight = inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.remove(&key);

            result
        }
        .boxed()
        .shared()
    }

    /// Number of completed entries
    pub fn len(&self) -> usize {
        let ready = self.inner.ready.read().unwrap_or_else(|e| e.into_inner());
        ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of builds currently running
    pub fn in_flight(&self) -> usize {
        let in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.len()
    }
}
