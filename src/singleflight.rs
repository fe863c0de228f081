//! Singleflight Module
//!
//! Collapses concurrent loads of the same key into one execution. The
//! first caller for a key becomes the leader and runs the load; callers
//! arriving while it is in flight wait and receive a clone of the
//! leader's result, error or not. Completed calls are dropped from the
//! table immediately; this is deduplication, not caching.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::sync::OnceLock;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::error::{CacheError, Result};

struct Call<T> {
    notify: Notify,
    result: OnceLock<Result<T>>,
}

/// Per-key deduplication gate for a single result type.
pub struct Flight<T> {
    calls: DashMap<String, Arc<Call<T>>>,
}

impl<T: Clone> Flight<T> {
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    /// Runs `load` for `key`, unless a call for the same key is already
    /// in flight, in which case the in-flight result is awaited and
    /// shared. At most one `load` executes concurrently per key.
    pub async fn run<F, Fut>(&self, key: &str, load: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let call = match self.calls.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                let call = entry.get().clone();
                drop(entry);
                return wait(&call).await;
            }
            Entry::Vacant(entry) => {
                let call = Arc::new(Call {
                    notify: Notify::new(),
                    result: OnceLock::new(),
                });
                entry.insert(call.clone());
                call
            }
        };

        // If the leader is cancelled mid-load the guard publishes an
        // error so waiters fail identically instead of hanging.
        let mut guard = LeaderGuard {
            flight: self,
            key,
            call: &call,
            finished: false,
        };

        let result = load().await;
        guard.finish(result.clone());
        result
    }
}

impl<T: Clone> Default for Flight<T> {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait<T: Clone>(call: &Call<T>) -> Result<T> {
    let mut notified = pin!(call.notify.notified());
    notified.as_mut().enable();

    if let Some(result) = call.result.get() {
        return result.clone();
    }
    notified.await;

    match call.result.get() {
        Some(result) => result.clone(),
        None => Err(CacheError::Internal(
            "singleflight completed without a result".into(),
        )),
    }
}

struct LeaderGuard<'a, T: Clone> {
    flight: &'a Flight<T>,
    key: &'a str,
    call: &'a Arc<Call<T>>,
    finished: bool,
}

impl<T: Clone> LeaderGuard<'_, T> {
    fn finish(&mut self, result: Result<T>) {
        self.finished = true;
        self.publish(result);
    }

    fn publish(&self, result: Result<T>) {
        let _ = self.call.result.set(result);
        self.flight.calls.remove(self.key);
        self.call.notify.notify_waiters();
    }
}

impl<T: Clone> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            self.publish(Err(CacheError::Load {
                key: self.key.to_string(),
                message: "load cancelled".into(),
            }));
        }
    }
}
