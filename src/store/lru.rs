//! Byte-bounded single-tier LRU store.
//!
//! One entry map plus an access-order deque behind a read/write lock.
//! Every live entry counts `key.len() + value.len()` against the byte
//! budget; inserts evict from the LRU end until the budget holds. Reads
//! take the read lock to look up and check expiry, then briefly take the
//! write lock to refresh recency, re-verifying presence because the
//! entry may have been evicted in between.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::byteview::ByteView;
use crate::store::util::now;
use crate::store::{EvictionCallback, Store};

struct LruEntry {
    value: ByteView,
    /// Expiry instant in nanoseconds, -1 means never
    expires_at: i64,
}

#[derive(Default)]
struct LruInner {
    entries: HashMap<String, LruEntry>,
    /// Access order, front = most recently used
    order: VecDeque<String>,
    used_bytes: i64,
}

impl LruInner {
    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_front(key.to_string());
    }

    fn remove_entry(&mut self, key: &str, on_evicted: Option<&EvictionCallback>) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        self.order.retain(|k| k != key);
        self.used_bytes -= (key.len() + entry.value.len()) as i64;
        if let Some(cb) = on_evicted {
            cb(key, &entry.value);
        }
        true
    }

    /// Drops expired entries, then evicts from the LRU end until the
    /// byte budget holds.
    fn evict(&mut self, max_bytes: i64, on_evicted: Option<&EvictionCallback>) {
        let current = now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at > 0 && current >= e.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove_entry(&key, on_evicted);
        }

        while max_bytes > 0 && self.used_bytes > max_bytes {
            let Some(oldest) = self.order.back().cloned() else {
                break;
            };
            self.remove_entry(&oldest, on_evicted);
        }
    }
}

/// Byte-bounded LRU store with TTL support.
pub struct LruStore {
    inner: RwLock<LruInner>,
    max_bytes: i64,
    on_evicted: Option<EvictionCallback>,
    closed: AtomicBool,
    sweep_stop: Mutex<Option<mpsc::Sender<()>>>,
}

impl LruStore {
    /// Creates a store holding at most `max_bytes` of keys plus values
    /// (8 MiB when zero) and sweeping expired entries every
    /// `cleanup_interval` (one minute when zero).
    pub fn new(
        max_bytes: i64,
        cleanup_interval: Duration,
        on_evicted: Option<EvictionCallback>,
    ) -> Arc<Self> {
        let max_bytes = if max_bytes <= 0 { 8 << 20 } else { max_bytes };
        let cleanup_interval = if cleanup_interval.is_zero() {
            Duration::from_secs(60)
        } else {
            cleanup_interval
        };

        let (stop_tx, stop_rx) = mpsc::channel();
        let store = Arc::new(Self {
            inner: RwLock::new(LruInner::default()),
            max_bytes,
            on_evicted,
            closed: AtomicBool::new(false),
            sweep_stop: Mutex::new(Some(stop_tx)),
        });

        spawn_sweeper(Arc::downgrade(&store), stop_rx, cleanup_interval);
        store
    }

    fn set_inner(&self, key: &str, value: ByteView, expires_at: i64) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let inner = &mut *guard;

        if let Some(entry) = inner.entries.get_mut(key) {
            inner.used_bytes += value.len() as i64 - entry.value.len() as i64;
            entry.value = value;
            entry.expires_at = expires_at;
            inner.touch(key);
            return;
        }

        inner.used_bytes += (key.len() + value.len()) as i64;
        inner
            .entries
            .insert(key.to_string(), LruEntry { value, expires_at });
        inner.order.push_front(key.to_string());
        inner.evict(self.max_bytes, self.on_evicted.as_ref());
    }
}

impl Store for LruStore {
    fn get(&self, key: &str) -> Option<ByteView> {
        let value = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let entry = inner.entries.get(key)?;
            if entry.expires_at > 0 && now() >= entry.expires_at {
                drop(inner);
                // Expired entries are deleted outside the read lock.
                self.delete(key);
                return None;
            }
            entry.value.clone()
        };

        // Recency updates need the write lock; the entry may have been
        // evicted while we were between the two locks.
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if inner.entries.contains_key(key) {
            inner.touch(key);
        }

        Some(value)
    }

    fn set(&self, key: &str, value: ByteView) {
        self.set_inner(key, value, -1);
    }

    fn set_with_ttl(&self, key: &str, value: ByteView, ttl: Duration) {
        let expires_at = now().saturating_add(ttl.as_nanos() as i64);
        self.set_inner(key, value, expires_at);
    }

    fn delete(&self, key: &str) -> bool {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        inner.remove_entry(key, self.on_evicted.as_ref())
    }

    fn clear(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(cb) = &self.on_evicted {
            for (key, entry) in &inner.entries {
                cb(key, &entry.value);
            }
        }

        inner.entries.clear();
        inner.order.clear();
        inner.used_bytes = 0;
    }

    fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sweep_stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

fn spawn_sweeper(store: Weak<LruStore>, stop_rx: mpsc::Receiver<()>, interval: Duration) {
    let _ = thread::Builder::new()
        .name("meshcache-lru-sweep".into())
        .spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let Some(store) = store.upgrade() else {
                        return;
                    };
                    if store.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    let before = store.len();
                    {
                        let mut inner = store
                            .inner
                            .write()
                            .unwrap_or_else(PoisonError::into_inner);
                        inner.evict(store.max_bytes, store.on_evicted.as_ref());
                    }
                    let removed = before.saturating_sub(store.len());
                    if removed > 0 {
                        debug!(removed, "lru sweep reclaimed entries");
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            }
        });
}

impl Drop for LruStore {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_set_and_get_roundtrip() {
        let store = LruStore::new(1024, Duration::from_secs(60), None);
        store.set("k", ByteView::from("v"));

        assert_eq!(store.get("k").unwrap().as_slice(), b"v");
        assert!(store.get("missing").is_none());
        assert_eq!(store.len(), 1);
        store.close();
    }

    #[test]
    fn test_byte_budget_evicts_lru_entry() {
        // Each entry is 2 bytes of key plus 8 bytes of value.
        let store = LruStore::new(30, Duration::from_secs(60), None);
        store.set("k1", ByteView::from("aaaaaaaa"));
        store.set("k2", ByteView::from("bbbbbbbb"));
        store.set("k3", ByteView::from("cccccccc"));
        assert_eq!(store.len(), 3);

        // A fourth entry exceeds 30 bytes; the oldest goes.
        store.set("k4", ByteView::from("dddddddd"));
        assert_eq!(store.len(), 3);
        assert!(store.get("k1").is_none());
        assert!(store.get("k4").is_some());
        store.close();
    }

    #[test]
    fn test_get_refreshes_recency() {
        let store = LruStore::new(30, Duration::from_secs(60), None);
        store.set("k1", ByteView::from("aaaaaaaa"));
        store.set("k2", ByteView::from("bbbbbbbb"));
        store.set("k3", ByteView::from("cccccccc"));

        // Touch k1 so that k2 becomes the eviction victim.
        store.get("k1");
        store.set("k4", ByteView::from("dddddddd"));

        assert!(store.get("k1").is_some());
        assert!(store.get("k2").is_none());
        store.close();
    }

    #[test]
    fn test_overwrite_adjusts_used_bytes() {
        let store = LruStore::new(1024, Duration::from_secs(60), None);
        store.set("k", ByteView::from("short"));
        store.set("k", ByteView::from("considerably longer value"));

        let used = store.inner.read().unwrap().used_bytes;
        assert_eq!(used, 1 + 25);
        store.close();
    }

    #[test]
    fn test_ttl_expiry() {
        let store = LruStore::new(1024, Duration::from_secs(60), None);
        store.set_with_ttl("k", ByteView::from("v"), Duration::from_millis(300));

        assert!(store.get("k").is_some());
        std::thread::sleep(Duration::from_millis(700));
        assert!(store.get("k").is_none());
        assert_eq!(store.len(), 0);
        store.close();
    }

    #[test]
    fn test_sweeper_reclaims_without_reads() {
        let store = LruStore::new(1024, Duration::from_millis(50), None);
        store.set_with_ttl("gone", ByteView::from("v"), Duration::from_millis(50));
        store.set("kept", ByteView::from("v"));

        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(store.len(), 1);
        store.close();
    }

    #[test]
    fn test_eviction_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = count.clone();
        let cb: EvictionCallback = Arc::new(move |_: &str, _: &ByteView| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let store = LruStore::new(1024, Duration::from_secs(60), Some(cb));
        store.set("a", ByteView::from("1"));
        store.set("b", ByteView::from("2"));

        store.delete("a");
        assert_eq!(count.load(Ordering::SeqCst), 1);

        store.clear();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
        store.close();
    }
}
