//! Group Module
//!
//! A group is a cache namespace: it owns a local storage tier, an
//! optional view of the cluster, and the data source of record. Reads
//! go local tier, then ring-owner peer, then data source, collapsing
//! concurrent loads of one key into a single execution. Writes land
//! locally and propagate asynchronously to the key's ring owner, with
//! a from-peer flag breaking propagation loops.
//!
//! Groups live in a process-wide registry keyed by name.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{info, warn};

use crate::byteview::ByteView;
use crate::cache::{Cache, CacheOptions};
use crate::error::{CacheError, Result};
use crate::peers::{PeerChoice, PeerPicker};
use crate::singleflight::Flight;

static GROUPS: Lazy<RwLock<HashMap<String, Arc<Group>>>> = Lazy::new(Default::default);

/// Origin of truth consulted on a total cache miss.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts an async closure into a [`DataSource`].
pub struct SourceFn<F>(pub F);

#[async_trait]
impl<F, Fut> DataSource for SourceFn<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send,
{
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.0)(key.to_string()).await
    }
}

/// Group construction options.
#[derive(Debug, Clone, Default)]
pub struct GroupOptions {
    /// Entry TTL; entries never expire when absent
    pub expiration: Option<Duration>,
    /// Local storage tuning
    pub cache: CacheOptions,
}

#[derive(Default)]
struct GroupStats {
    loads: AtomicI64,
    local_hits: AtomicI64,
    local_misses: AtomicI64,
    peer_hits: AtomicI64,
    peer_misses: AtomicI64,
    loader_hits: AtomicI64,
    loader_errors: AtomicI64,
    load_duration_ns: AtomicI64,
}

/// Counter snapshot with derived rates.
#[derive(Debug, Clone, Serialize)]
pub struct GroupStatsSnapshot {
    pub name: String,
    pub closed: bool,
    pub entries: usize,
    pub loads: i64,
    pub local_hits: i64,
    pub local_misses: i64,
    pub peer_hits: i64,
    pub peer_misses: i64,
    pub loader_hits: i64,
    pub loader_errors: i64,
    pub hit_rate: f64,
    pub avg_load_time_ms: f64,
}

/// A named cache namespace.
pub struct Group {
    name: String,
    source: Arc<dyn DataSource>,
    cache: Cache,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    flight: Flight<ByteView>,
    expiration: Option<Duration>,
    closed: AtomicBool,
    stats: GroupStats,
}

/// Creates a group and installs it in the process-wide registry,
/// replacing (and logging) any previous group of the same name.
/// `cache_bytes` bounds the local tier when the byte-bounded engine is
/// selected.
pub fn new_group(
    name: &str,
    cache_bytes: i64,
    source: Arc<dyn DataSource>,
    options: GroupOptions,
) -> Arc<Group> {
    let mut cache_options = options.cache;
    if cache_bytes > 0 {
        cache_options.max_bytes = cache_bytes;
    }

    let group = Arc::new(Group {
        name: name.to_string(),
        source,
        cache: Cache::new(cache_options),
        peers: OnceLock::new(),
        flight: Flight::new(),
        expiration: options.expiration,
        closed: AtomicBool::new(false),
        stats: GroupStats::default(),
    });

    let mut groups = GROUPS.write().unwrap_or_else(PoisonError::into_inner);
    if groups.contains_key(name) {
        warn!(group = %name, "group already exists, replacing");
    }
    groups.insert(name.to_string(), group.clone());
    info!(group = %name, expiration = ?group.expiration, "created group");

    group
}

/// Looks up a group by name.
pub fn get_group(name: &str) -> Option<Arc<Group>> {
    GROUPS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

/// Names of all registered groups.
pub fn list_groups() -> Vec<String> {
    GROUPS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect()
}

/// Closes and removes a group. Returns whether one existed.
pub fn destroy_group(name: &str) -> bool {
    let removed = GROUPS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(name);

    match removed {
        Some(group) => {
            group.close();
            info!(group = %name, "destroyed group");
            true
        }
        None => false,
    }
}

/// Closes and removes every group.
pub fn destroy_all_groups() {
    let drained: Vec<(String, Arc<Group>)> = GROUPS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .collect();

    for (name, group) in drained {
        group.close();
        info!(group = %name, "destroyed group");
    }
}

enum WriteOp {
    Set(Vec<u8>),
    Delete,
}

impl Group {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wires the cluster view in. Must be called at most once.
    ///
    /// # Panics
    /// Panics when peers were already registered.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) {
        if self.peers.set(peers).is_err() {
            panic!("register_peers called more than once");
        }
        info!(group = %self.name, "registered peers");
    }

    /// Reads a key: local tier, then ring-owner peer, then data source.
    /// Concurrent misses for one key share a single load.
    pub async fn get(&self, key: &str) -> Result<ByteView> {
        if self.is_closed() {
            return Err(CacheError::GroupClosed);
        }
        if key.is_empty() {
            return Err(CacheError::KeyRequired);
        }

        if let Some(view) = self.cache.get(key) {
            self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(view);
        }
        self.stats.local_misses.fetch_add(1, Ordering::Relaxed);

        self.load_once(key).await
    }

    /// Writes a key locally and, for originator writes, propagates it
    /// to the key's ring owner in the background. `from_peer` marks
    /// writes arriving from another cluster member.
    pub fn set(&self, key: &str, value: &[u8], from_peer: bool) -> Result<()> {
        self.set_with_ttl(key, value, None, from_peer)
    }

    /// Like [`Group::set`], with a per-entry TTL overriding the group
    /// policy for this write. Propagation carries only the value; the
    /// receiving owner installs it under its own TTL policy.
    pub fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
        from_peer: bool,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(CacheError::GroupClosed);
        }
        if key.is_empty() {
            return Err(CacheError::KeyRequired);
        }
        if value.is_empty() {
            return Err(CacheError::ValueRequired);
        }

        self.install_for(key, ByteView::from_slice(value), ttl.or(self.expiration));

        if !from_peer {
            self.propagate(key, WriteOp::Set(value.to_vec()));
        }
        Ok(())
    }

    /// Deletes a key locally and, for originator deletes, propagates.
    pub fn delete(&self, key: &str, from_peer: bool) -> Result<()> {
        if self.is_closed() {
            return Err(CacheError::GroupClosed);
        }
        if key.is_empty() {
            return Err(CacheError::KeyRequired);
        }

        self.cache.delete(key);

        if !from_peer {
            self.propagate(key, WriteOp::Delete);
        }
        Ok(())
    }

    /// Purges the local tier.
    pub fn clear(&self) {
        if self.is_closed() {
            return;
        }
        self.cache.clear();
        info!(group = %self.name, "cleared group");
    }

    /// Closes the group: tears down the local tier and removes the
    /// group from the registry (unless it was already replaced).
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cache.close();

        let mut groups = GROUPS.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = groups.get(&self.name) {
            if std::ptr::eq(Arc::as_ptr(current), self) {
                groups.remove(&self.name);
            }
        }
        info!(group = %self.name, "closed group");
    }

    /// Counter snapshot with derived hit rate and load latency.
    pub fn stats(&self) -> GroupStatsSnapshot {
        let loads = self.stats.loads.load(Ordering::Relaxed);
        let local_hits = self.stats.local_hits.load(Ordering::Relaxed);
        let local_misses = self.stats.local_misses.load(Ordering::Relaxed);

        let total_gets = local_hits + local_misses;
        let hit_rate = if total_gets > 0 {
            local_hits as f64 / total_gets as f64
        } else {
            0.0
        };
        let avg_load_time_ms = if loads > 0 {
            self.stats.load_duration_ns.load(Ordering::Relaxed) as f64 / loads as f64 / 1e6
        } else {
            0.0
        };

        GroupStatsSnapshot {
            name: self.name.clone(),
            closed: self.is_closed(),
            entries: self.cache.len(),
            loads,
            local_hits,
            local_misses,
            peer_hits: self.stats.peer_hits.load(Ordering::Relaxed),
            peer_misses: self.stats.peer_misses.load(Ordering::Relaxed),
            loader_hits: self.stats.loader_hits.load(Ordering::Relaxed),
            loader_errors: self.stats.loader_errors.load(Ordering::Relaxed),
            hit_rate,
            avg_load_time_ms,
        }
    }

    /// Loads a key through the singleflight gate. Load accounting is
    /// done by the leader, so coalesced callers count as one load.
    async fn load_once(&self, key: &str) -> Result<ByteView> {
        self.flight
            .run(key, || async {
                self.stats.loads.fetch_add(1, Ordering::Relaxed);
                let started = Instant::now();

                let result = self.fetch(key).await;

                self.stats
                    .load_duration_ns
                    .fetch_add(started.elapsed().as_nanos() as i64, Ordering::Relaxed);

                match result {
                    Ok(view) => {
                        self.install(key, view.clone());
                        Ok(view)
                    }
                    Err(e) => {
                        self.stats.loader_errors.fetch_add(1, Ordering::Relaxed);
                        Err(e)
                    }
                }
            })
            .await
    }

    /// Fetches from the ring-owner peer when one exists, falling back
    /// to the data source. Peer failures degrade to the source.
    async fn fetch(&self, key: &str) -> Result<ByteView> {
        if let Some(picker) = self.peers.get() {
            if let PeerChoice::Remote(peer) = picker.pick_peer(key) {
                match peer.get(&self.name, key).await {
                    Ok(bytes) => {
                        self.stats.peer_hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(ByteView::from(bytes));
                    }
                    Err(e) => {
                        self.stats.peer_misses.fetch_add(1, Ordering::Relaxed);
                        warn!(group = %self.name, key, error = %e, "peer fetch failed");
                    }
                }
            }
        }

        match self.source.get(key).await {
            Ok(bytes) => {
                self.stats.loader_hits.fetch_add(1, Ordering::Relaxed);
                Ok(ByteView::from(bytes))
            }
            Err(e) => Err(CacheError::Load {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn install(&self, key: &str, view: ByteView) {
        self.install_for(key, view, self.expiration);
    }

    fn install_for(&self, key: &str, view: ByteView, ttl: Option<Duration>) {
        match ttl {
            Some(ttl) => self.cache.add_with_ttl(key, view, ttl),
            None => self.cache.add(key, view),
        }
    }

    /// Fire-and-forget write propagation to the key's ring owner. The
    /// local write already succeeded; failures here are logged only.
    fn propagate(&self, key: &str, op: WriteOp) {
        let Some(picker) = self.peers.get().cloned() else {
            return;
        };
        let group = self.name.clone();
        let key = key.to_string();

        tokio::spawn(async move {
            let PeerChoice::Remote(peer) = picker.pick_peer(&key) else {
                return;
            };

            let result = match &op {
                WriteOp::Set(value) => peer.set(&group, &key, value).await,
                WriteOp::Delete => peer.delete(&group, &key).await.map(|_| ()),
            };

            if let Err(e) = result {
                let op = match op {
                    WriteOp::Set(_) => "set",
                    WriteOp::Delete => "delete",
                };
                warn!(%group, %key, op, error = %e, "failed to propagate write to peer");
            }
        });
    }
}
