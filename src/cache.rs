//! Cache Module
//!
//! Thin facade a group owns over its storage engine, choosing the
//! engine kind and translating group-level TTL policy into store calls.

use std::sync::Arc;
use std::time::Duration;

use crate::byteview::ByteView;
use crate::store::{new_store, EvictionCallback, Store, StoreKind, StoreOptions};

/// Storage configuration for one cache.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub kind: StoreKind,
    pub max_bytes: i64,
    pub bucket_count: u16,
    pub cap_per_bucket: u16,
    pub level2_cap: u16,
    pub cleanup_interval: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        let store = StoreOptions::default();
        Self {
            kind: StoreKind::Lru2,
            max_bytes: store.max_bytes,
            bucket_count: store.bucket_count,
            cap_per_bucket: store.cap_per_bucket,
            level2_cap: store.level2_cap,
            cleanup_interval: store.cleanup_interval,
        }
    }
}

/// A group's local storage tier.
pub struct Cache {
    store: Arc<dyn Store>,
}

impl Cache {
    pub fn new(options: CacheOptions) -> Self {
        Self::with_eviction_callback(options, None)
    }

    pub fn with_eviction_callback(
        options: CacheOptions,
        on_evicted: Option<EvictionCallback>,
    ) -> Self {
        let store = new_store(
            options.kind,
            StoreOptions {
                max_bytes: options.max_bytes,
                bucket_count: options.bucket_count,
                cap_per_bucket: options.cap_per_bucket,
                level2_cap: options.level2_cap,
                cleanup_interval: options.cleanup_interval,
                on_evicted,
            },
        );
        Self { store }
    }

    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.store.get(key)
    }

    /// Installs an entry that never expires.
    pub fn add(&self, key: &str, value: ByteView) {
        self.store.set(key, value);
    }

    /// Installs an entry that expires after `ttl`.
    pub fn add_with_ttl(&self, key: &str, value: ByteView, ttl: Duration) {
        self.store.set_with_ttl(key, value, ttl);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.delete(key)
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn close(&self) {
        self.store.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_over_both_engines() {
        for kind in [StoreKind::Lru, StoreKind::Lru2] {
            let cache = Cache::new(CacheOptions {
                kind,
                ..CacheOptions::default()
            });

            cache.add("k", ByteView::from("v"));
            assert_eq!(cache.get("k").unwrap().as_slice(), b"v");
            assert_eq!(cache.len(), 1);

            assert!(cache.delete("k"));
            assert!(cache.is_empty());
            cache.close();
        }
    }

    #[test]
    fn test_cache_ttl_policy() {
        let cache = Cache::new(CacheOptions::default());
        cache.add_with_ttl("k", ByteView::from("v"), Duration::from_millis(300));

        assert!(cache.get("k").is_some());
        std::thread::sleep(Duration::from_millis(700));
        assert!(cache.get("k").is_none());
        cache.close();
    }
}
