//! Two-tier bucketed LRU store.
//!
//! Keys are sharded over `bkdr(key) & mask` buckets, each guarded by its
//! own mutex and holding two independent arenas: a hot tier (L1) that
//! admits every write and a warm tier (L2) fed by reads. A read that
//! hits L1 consumes the entry and demotes it to L2, so L1 tracks the
//! most recently admitted items while L2 keeps anything seen at least
//! once. A background sweeper reclaims expired entries; everything else
//! is reclaimed on access.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::byteview::ByteView;
use crate::store::bucket::Bucket;
use crate::store::util::{hash_bkdr, mask_of_next_pow_of_2, now};
use crate::store::{EvictionCallback, Store};

struct BucketPair {
    hot: Bucket,
    warm: Bucket,
}

/// Sharded two-tier LRU store with TTL support.
pub struct Lru2Store {
    shards: Vec<Mutex<BucketPair>>,
    mask: i32,
    on_evicted: Option<EvictionCallback>,
    closed: AtomicBool,
    sweep_stop: Mutex<Option<mpsc::Sender<()>>>,
}

impl Lru2Store {
    /// Creates a store with `bucket_count` shards (rounded up to a power
    /// of two) of `cap_per_bucket` hot and `level2_cap` warm slots each.
    /// Zero arguments fall back to 16 buckets, 1024-slot tiers and a
    /// one-minute sweep.
    pub fn new(
        bucket_count: u16,
        cap_per_bucket: u16,
        level2_cap: u16,
        cleanup_interval: Duration,
        on_evicted: Option<EvictionCallback>,
    ) -> Arc<Self> {
        let bucket_count = if bucket_count == 0 { 16 } else { bucket_count };
        let cap_per_bucket = if cap_per_bucket == 0 { 1024 } else { cap_per_bucket };
        let level2_cap = if level2_cap == 0 { 1024 } else { level2_cap };
        let cleanup_interval = if cleanup_interval.is_zero() {
            Duration::from_secs(60)
        } else {
            cleanup_interval
        };

        let mask = mask_of_next_pow_of_2(bucket_count);
        let shards = (0..=mask)
            .map(|_| {
                Mutex::new(BucketPair {
                    hot: Bucket::new(cap_per_bucket),
                    warm: Bucket::new(level2_cap),
                })
            })
            .collect();

        let (stop_tx, stop_rx) = mpsc::channel();
        let store = Arc::new(Self {
            shards,
            mask: mask as i32,
            on_evicted,
            closed: AtomicBool::new(false),
            sweep_stop: Mutex::new(Some(stop_tx)),
        });

        spawn_sweeper(Arc::downgrade(&store), stop_rx, cleanup_interval);
        store
    }

    fn shard(&self, key: &str) -> &Mutex<BucketPair> {
        let idx = (hash_bkdr(key) & self.mask) as usize;
        &self.shards[idx]
    }

    /// Removes a key from both tiers of a locked pair, firing the
    /// eviction callback once if either copy was live.
    fn purge_pair(&self, pair: &mut BucketPair, key: &str) -> bool {
        let hot = pair.hot.del(key);
        let warm = pair.warm.del(key);
        let deleted = hot.is_some() || warm.is_some();

        if deleted {
            if let Some(cb) = &self.on_evicted {
                if let Some((value, _)) = hot.or(warm) {
                    cb(key, &value);
                }
            }
        }

        deleted
    }
}

impl Store for Lru2Store {
    fn get(&self, key: &str) -> Option<ByteView> {
        let mut pair = self
            .shard(key)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = now();

        // The hot tier is read by consuming: a hit is demoted to the
        // warm tier so L1 keeps only the most recently admitted items.
        if let Some((value, deadline)) = pair.hot.del(key) {
            if deadline > 0 && current >= deadline {
                // The hot copy was already consumed; purge covers a
                // surviving warm copy, otherwise the callback fires here.
                let purged = self.purge_pair(&mut pair, key);
                if !purged {
                    if let Some(cb) = &self.on_evicted {
                        cb(key, &value);
                    }
                }
                return None;
            }

            pair.warm
                .put(key, value.clone(), deadline, self.on_evicted.as_ref());
            return Some(value);
        }

        if let Some((value, deadline)) = pair.warm.get(key) {
            if deadline == 0 {
                return None;
            }
            if deadline > 0 && current >= deadline {
                self.purge_pair(&mut pair, key);
                return None;
            }
            return Some(value);
        }

        None
    }

    fn set(&self, key: &str, value: ByteView) {
        let mut pair = self
            .shard(key)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        pair.hot.put(key, value, -1, self.on_evicted.as_ref());
    }

    fn set_with_ttl(&self, key: &str, value: ByteView, ttl: Duration) {
        let deadline = now().saturating_add(ttl.as_nanos() as i64);
        let mut pair = self
            .shard(key)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        pair.hot.put(key, value, deadline, self.on_evicted.as_ref());
    }

    fn delete(&self, key: &str) -> bool {
        let mut pair = self
            .shard(key)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.purge_pair(&mut pair, key)
    }

    fn clear(&self) {
        let mut keys = HashSet::new();
        for shard in &self.shards {
            let pair = shard.lock().unwrap_or_else(PoisonError::into_inner);
            pair.hot.walk(|key, _, _| {
                keys.insert(key.to_string());
                true
            });
            pair.warm.walk(|key, _, _| {
                keys.insert(key.to_string());
                true
            });
        }

        for key in keys {
            self.delete(&key);
        }
    }

    fn len(&self) -> usize {
        let mut count = 0;
        for shard in &self.shards {
            let pair = shard.lock().unwrap_or_else(PoisonError::into_inner);
            pair.hot.walk(|_, _, _| {
                count += 1;
                true
            });
            pair.warm.walk(|_, _, _| {
                count += 1;
                true
            });
        }
        count
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender wakes the sweeper, which then exits.
        self.sweep_stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Sweeps expired entries out of every shard.
fn sweep(store: &Lru2Store) {
    let current = now();
    let mut removed = 0usize;

    for shard in &store.shards {
        let mut pair = shard.lock().unwrap_or_else(PoisonError::into_inner);

        let mut expired = HashSet::new();
        pair.hot.walk(|key, _, deadline| {
            if deadline > 0 && current >= deadline {
                expired.insert(key.to_string());
            }
            true
        });
        pair.warm.walk(|key, _, deadline| {
            if deadline > 0 && current >= deadline {
                expired.insert(key.to_string());
            }
            true
        });

        for key in &expired {
            store.purge_pair(&mut pair, key);
        }
        removed += expired.len();
    }

    if removed > 0 {
        debug!(removed, "lru2 sweep reclaimed expired entries");
    }
}

fn spawn_sweeper(store: Weak<Lru2Store>, stop_rx: mpsc::Receiver<()>, interval: Duration) {
    let _ = thread::Builder::new()
        .name("meshcache-lru2-sweep".into())
        .spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let Some(store) = store.upgrade() else {
                        return;
                    };
                    if store.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    sweep(&store);
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            }
        });
}

impl Drop for Lru2Store {
    fn drop(&mut self) {
        self.close();
    }
}
