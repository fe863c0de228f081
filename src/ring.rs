//! Consistent-hash ring with virtual nodes and adaptive rebalancing.
//!
//! Each node contributes `replicas` virtual positions hashed from
//! `"{node}-{i}"` with CRC32-IEEE. Lookup binary-searches the sorted
//! position array for the first hash at or after the key's hash,
//! wrapping to the start. Per-node hit counters feed a rebalance pass
//! that shrinks the virtual-node count of hot nodes and grows cold
//! ones, bounded by the configured replica range.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info};

use crate::error::{CacheError, Result};

/// Ring tuning parameters.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Virtual nodes created per node on Add
    pub default_replicas: usize,
    /// Lower bound applied during rebalancing
    pub min_replicas: usize,
    /// Upper bound applied during rebalancing
    pub max_replicas: usize,
    /// Max per-node deviation from the mean load before rebalancing
    pub balance_threshold: f64,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            default_replicas: 50,
            min_replicas: 10,
            max_replicas: 200,
            balance_threshold: 0.25,
        }
    }
}

/// Requests observed before the balancer considers acting.
const MIN_SAMPLE: i64 = 1000;

#[derive(Default)]
struct RingState {
    /// Sorted virtual-node hashes
    keys: Vec<u32>,
    /// Virtual-node hash to owning node
    nodes: HashMap<u32, String>,
    /// Node to its current virtual-node count
    node_replicas: HashMap<String, usize>,
    /// Node to requests routed to it since the last rebalance
    node_counts: HashMap<String, AtomicI64>,
}

/// Consistent-hash ring over cluster member addresses.
pub struct HashRing {
    config: RingConfig,
    state: RwLock<RingState>,
    total_requests: AtomicI64,
}

fn vnode_hash(node: &str, index: usize) -> u32 {
    crc32fast::hash(format!("{node}-{index}").as_bytes())
}

impl HashRing {
    pub fn new(config: RingConfig) -> Self {
        Self {
            config,
            state: RwLock::new(RingState::default()),
            total_requests: AtomicI64::new(0),
        }
    }

    /// Adds nodes, each with the default replica count. Empty node
    /// strings are skipped; an empty argument list is an error.
    pub fn add(&self, nodes: &[&str]) -> Result<()> {
        if nodes.is_empty() {
            return Err(CacheError::Internal("no nodes provided".into()));
        }

        let mut state = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for node in nodes {
            if node.is_empty() {
                continue;
            }
            Self::add_node_locked(&mut state, node, self.config.default_replicas);
        }
        state.keys.sort_unstable();
        Ok(())
    }

    /// Removes a node and all of its virtual positions.
    pub fn remove(&self, node: &str) -> Result<()> {
        if node.is_empty() {
            return Err(CacheError::Internal("invalid node".into()));
        }

        let mut state = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Self::remove_node_locked(&mut state, node)
    }

    /// Maps a key to its owning node. Returns `None` for an empty key or
    /// an empty ring. Records the hit for the rebalancer.
    pub fn get(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.keys.is_empty() {
            return None;
        }

        let hash = crc32fast::hash(key.as_bytes());
        let idx = state.keys.partition_point(|&k| k < hash);
        let idx = if idx == state.keys.len() { 0 } else { idx };
        let node = state.nodes.get(&state.keys[idx])?.clone();

        // Counters are atomics, so recording a hit stays under the read
        // lock without racing concurrent lookups.
        if let Some(count) = state.node_counts.get(&node) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        Some(node)
    }

    /// True when no node holds any position on the ring.
    pub fn is_empty(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys
            .is_empty()
    }

    /// Share of recorded requests per node since the last rebalance.
    pub fn stats(&self) -> HashMap<String, f64> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return HashMap::new();
        }

        state
            .node_counts
            .iter()
            .map(|(node, count)| {
                (
                    node.clone(),
                    count.load(Ordering::Relaxed) as f64 / total as f64,
                )
            })
            .collect()
    }

    /// Inspects the load counters and rebalances when the deviation from
    /// the mean exceeds the configured threshold. Cheap when idle; meant
    /// to be driven by a periodic tick.
    pub fn check_and_rebalance(&self) {
        if self.total_requests.load(Ordering::Relaxed) < MIN_SAMPLE {
            return;
        }

        let exceeded = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if state.node_replicas.is_empty() {
                return;
            }

            let total = self.total_requests.load(Ordering::Relaxed) as f64;
            let avg = total / state.node_replicas.len() as f64;
            let max_deviation = state
                .node_counts
                .values()
                .map(|c| (c.load(Ordering::Relaxed) as f64 - avg).abs() / avg)
                .fold(0.0f64, f64::max);

            max_deviation > self.config.balance_threshold
        };

        if exceeded {
            self.rebalance();
        }
    }

    fn rebalance(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if state.node_replicas.is_empty() {
            return;
        }

        let total = self.total_requests.load(Ordering::Relaxed) as f64;
        let avg = total / state.node_replicas.len() as f64;

        let loads: Vec<(String, i64)> = state
            .node_counts
            .iter()
            .map(|(node, count)| (node.clone(), count.load(Ordering::Relaxed)))
            .collect();

        for (node, count) in loads {
            let Some(&current) = state.node_replicas.get(&node) else {
                continue;
            };
            let ratio = count as f64 / avg;

            let target = if ratio > 1.0 {
                (current as f64 / ratio).round() as usize
            } else {
                (current as f64 * (2.0 - ratio)).round() as usize
            };
            let target = target.clamp(self.config.min_replicas, self.config.max_replicas);

            if target != current {
                debug!(node = %node, current, target, "adjusting virtual nodes");
                if Self::remove_node_locked(&mut state, &node).is_err() {
                    continue;
                }
                Self::add_node_locked(&mut state, &node, target);
            }
        }

        for count in state.node_counts.values() {
            count.store(0, Ordering::Relaxed);
        }
        self.total_requests.store(0, Ordering::Relaxed);
        state.keys.sort_unstable();
        info!("ring rebalanced");
    }

    fn add_node_locked(state: &mut RingState, node: &str, replicas: usize) {
        for i in 0..replicas {
            let hash = vnode_hash(node, i);
            state.keys.push(hash);
            state.nodes.insert(hash, node.to_string());
        }
        state.node_replicas.insert(node.to_string(), replicas);
        state
            .node_counts
            .entry(node.to_string())
            .or_insert_with(|| AtomicI64::new(0));
    }

    fn remove_node_locked(state: &mut RingState, node: &str) -> Result<()> {
        let Some(replicas) = state.node_replicas.get(node).copied() else {
            return Err(CacheError::Internal(format!("node {node} not found")));
        };

        for i in 0..replicas {
            let hash = vnode_hash(node, i);
            state.nodes.remove(&hash);
            if let Some(pos) = state.keys.iter().position(|&k| k == hash) {
                state.keys.remove(pos);
            }
        }

        state.node_replicas.remove(node);
        state.node_counts.remove(node);
        Ok(())
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(RingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring_and_empty_key() {
        let ring = HashRing::default();
        assert!(ring.get("k").is_none());

        ring.add(&["node-a"]).unwrap();
        assert!(ring.get("").is_none());
        assert!(ring.get("k").is_some());
    }

    #[test]
    fn test_add_requires_nodes() {
        let ring = HashRing::default();
        assert!(ring.add(&[]).is_err());
        // Empty strings are skipped, leaving the ring empty.
        ring.add(&[""]).unwrap();
        assert!(ring.is_empty());
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let ring = HashRing::default();
        ring.add(&["10.0.0.1:8001", "10.0.0.2:8001", "10.0.0.3:8001"])
            .unwrap();

        for key in ["alpha", "beta", "gamma", "delta"] {
            let first = ring.get(key).unwrap();
            for _ in 0..10 {
                assert_eq!(ring.get(key).unwrap(), first);
            }
        }
    }

    #[test]
    fn test_every_key_maps_to_a_member() {
        let ring = HashRing::default();
        ring.add(&["a", "b", "c"]).unwrap();

        for i in 0..500 {
            let node = ring.get(&format!("key-{i}")).unwrap();
            assert!(["a", "b", "c"].contains(&node.as_str()));
        }
    }

    #[test]
    fn test_remove_reroutes_only_affected_keys() {
        let ring = HashRing::default();
        ring.add(&["a", "b", "c"]).unwrap();

        let before: Vec<(String, String)> = (0..200)
            .map(|i| {
                let key = format!("key-{i}");
                let node = ring.get(&key).unwrap();
                (key, node)
            })
            .collect();

        ring.remove("c").unwrap();

        for (key, node) in before {
            let after = ring.get(&key).unwrap();
            assert_ne!(after, "c");
            if node != "c" {
                assert_eq!(after, node, "key {key} moved despite owner surviving");
            }
        }
    }

    #[test]
    fn test_remove_unknown_node_is_an_error() {
        let ring = HashRing::default();
        ring.add(&["a"]).unwrap();
        assert!(ring.remove("ghost").is_err());
        assert!(ring.remove("").is_err());
    }

    #[test]
    fn test_stats_reports_shares() {
        let ring = HashRing::default();
        ring.add(&["a", "b"]).unwrap();

        for i in 0..100 {
            ring.get(&format!("key-{i}"));
        }

        let shares = ring.stats();
        let sum: f64 = shares.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_skewed_load_triggers_rebalance() {
        let ring = HashRing::default();
        ring.add(&["a", "b", "c"]).unwrap();

        // Simulate 10_000 routed requests with counts (8000, 1000, 1000):
        // max deviation is about 1.33, well past the 0.25 threshold.
        {
            let state = ring.state.read().unwrap();
            state.node_counts["a"].store(8000, Ordering::Relaxed);
            state.node_counts["b"].store(1000, Ordering::Relaxed);
            state.node_counts["c"].store(1000, Ordering::Relaxed);
        }
        ring.total_requests.store(10_000, Ordering::Relaxed);

        ring.check_and_rebalance();

        let state = ring.state.read().unwrap();
        let defaults = RingConfig::default();
        assert!(state.node_replicas["a"] < defaults.default_replicas);
        assert!(state.node_replicas["b"] > defaults.default_replicas);
        assert!(state.node_replicas["c"] > defaults.default_replicas);
        for replicas in state.node_replicas.values() {
            assert!(*replicas >= defaults.min_replicas);
            assert!(*replicas <= defaults.max_replicas);
        }

        // Counters reset after the pass.
        assert_eq!(ring.total_requests.load(Ordering::Relaxed), 0);
        for count in state.node_counts.values() {
            assert_eq!(count.load(Ordering::Relaxed), 0);
        }

        // The ring stays consistent: every position maps to a node and
        // the position array is sorted.
        assert_eq!(state.keys.len(), state.node_replicas.values().sum::<usize>());
        assert!(state.keys.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_small_sample_is_left_alone() {
        let ring = HashRing::default();
        ring.add(&["a", "b"]).unwrap();

        {
            let state = ring.state.read().unwrap();
            state.node_counts["a"].store(900, Ordering::Relaxed);
        }
        ring.total_requests.store(900, Ordering::Relaxed);

        ring.check_and_rebalance();

        let state = ring.state.read().unwrap();
        let defaults = RingConfig::default();
        assert_eq!(state.node_replicas["a"], defaults.default_replicas);
        assert_eq!(ring.total_requests.load(Ordering::Relaxed), 900);
    }
}
