//! Coalesces concurrent requests for the same logical operation.
//!
//! The first caller for a key starts the work; callers arriving while it is
//! pending await the same shared result. Once it resolves the entry is dropped,
//! so a later request (say, after a failure) starts fresh work.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

pub struct SingleFlight<K, T, E> {
    inflight: Mutex<HashMap<K, (u64, Flight<T, E>)>>,
    next_id: AtomicU64,
}

impl<K, T, E> Default for SingleFlight<K, T, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T, E> SingleFlight<K, T, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, (u64, Flight<T, E>)>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `make()` for `key` unless an identical request is already pending,
    /// in which case its result is shared.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (id, flight) = {
            let mut inflight = self.lock();
            match inflight.get(&key) {
                Some((id, flight)) => {
                    debug!(?key, "[SINGLE_FLIGHT] Joining pending request");
                    (*id, flight.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let flight = make().boxed().shared();
                    inflight.insert(key.clone(), (id, flight.clone()));
                    (id, flight)
                }
            }
        };

        let result = flight.await;

        let mut inflight = self.lock();
        if matches!(inflight.get(&key), Some((current, _)) if *current == id) {
            inflight.remove(&key);
        }
        result
    }

    /// Number of keys with a pending request.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }
}
