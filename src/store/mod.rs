//! Store Module
//!
//! Pluggable in-memory storage engines behind the [`Store`] trait:
//! a sharded two-tier LRU with per-bucket locks ([`Lru2Store`]) and a
//! byte-bounded single-tier LRU ([`LruStore`]). Both carry per-entry
//! TTLs, fire an eviction callback for removed live entries, and sweep
//! expired entries on a background interval.

mod bucket;
mod lru;
mod lru2;
mod util;


pub use lru::LruStore;
pub use lru2::Lru2Store;

use std::sync::Arc;
use std::time::Duration;

use crate::byteview::ByteView;

/// Callback invoked once per live entry removed from a store.
pub type EvictionCallback = Arc<dyn Fn(&str, &ByteView) + Send + Sync>;

/// Common interface over the storage engines.
///
/// Implementations are internally synchronized; all methods take `&self`.
pub trait Store: Send + Sync {
    /// Looks up a key, refreshing its recency. Expired entries miss.
    fn get(&self, key: &str) -> Option<ByteView>;

    /// Inserts or overwrites an entry that never expires.
    fn set(&self, key: &str, value: ByteView);

    /// Inserts or overwrites an entry that expires after `ttl`.
    fn set_with_ttl(&self, key: &str, value: ByteView, ttl: Duration);

    /// Removes an entry, returning whether one was present and live.
    fn delete(&self, key: &str) -> bool;

    /// Removes every entry, firing the eviction callback for each.
    fn clear(&self);

    /// Number of live entries.
    fn len(&self) -> usize;

    /// True when no live entries remain.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the background sweeper. Further calls are permitted but the
    /// store will no longer reclaim expired entries on its own.
    fn close(&self);
}

/// Which storage engine a cache uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Byte-bounded single-tier LRU
    Lru,
    /// Sharded two-tier LRU
    Lru2,
}

/// Tuning knobs shared by the storage engines.
#[derive(Clone)]
pub struct StoreOptions {
    /// Byte budget for [`StoreKind::Lru`]
    pub max_bytes: i64,
    /// Shard count for [`StoreKind::Lru2`], rounded up to a power of two
    pub bucket_count: u16,
    /// Hot-tier capacity per bucket
    pub cap_per_bucket: u16,
    /// Warm-tier capacity per bucket
    pub level2_cap: u16,
    /// Interval between expiry sweeps
    pub cleanup_interval: Duration,
    /// Invoked for each live entry removed from the store
    pub on_evicted: Option<EvictionCallback>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_bytes: 8192,
            bucket_count: 16,
            cap_per_bucket: 512,
            level2_cap: 256,
            cleanup_interval: Duration::from_secs(60),
            on_evicted: None,
        }
    }
}

impl std::fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreOptions")
            .field("max_bytes", &self.max_bytes)
            .field("bucket_count", &self.bucket_count)
            .field("cap_per_bucket", &self.cap_per_bucket)
            .field("level2_cap", &self.level2_cap)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("on_evicted", &self.on_evicted.is_some())
            .finish()
    }
}

/// Creates a storage engine of the requested kind.
pub fn new_store(kind: StoreKind, opts: StoreOptions) -> Arc<dyn Store> {
    match kind {
        StoreKind::Lru2 => Lru2Store::new(
            opts.bucket_count,
            opts.cap_per_bucket,
            opts.level2_cap,
            opts.cleanup_interval,
            opts.on_evicted,
        ),
        StoreKind::Lru => LruStore::new(opts.max_bytes, opts.cleanup_interval, opts.on_evicted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_builds_both_kinds() {
        let lru = new_store(StoreKind::Lru, StoreOptions::default());
        let lru2 = new_store(StoreKind::Lru2, StoreOptions::default());

        lru.set("a", ByteView::from("1"));
        lru2.set("a", ByteView::from("1"));

        assert_eq!(lru.get("a").unwrap().as_slice(), b"1");
        assert_eq!(lru2.get("a").unwrap().as_slice(), b"1");

        lru.close();
        lru2.close();
    }
}
