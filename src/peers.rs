//! Peers Module
//!
//! Cluster membership view and request routing. The picker watches the
//! coordination store for members of its service, keeps one RPC client
//! per live peer, and routes keys through the consistent-hash ring. The
//! local address never becomes a routable target; a key the ring maps
//! to this node is reported as self so callers treat it as local.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{EventType, GetOptions, WatchOptions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::HttpPeer;
use crate::error::Result;
use crate::registry::{self, RegistryConfig};
use crate::ring::{HashRing, RingConfig};

/// Header marking a write as peer-originated, suppressing re-propagation.
pub const FROM_PEER_HEADER: &str = "x-from-peer";

/// A remote cache node.
#[async_trait]
pub trait Peer: Send + Sync {
    async fn get(&self, group: &str, key: &str) -> Result<Vec<u8>>;
    async fn set(&self, group: &str, key: &str, value: &[u8]) -> Result<()>;
    async fn delete(&self, group: &str, key: &str) -> Result<bool>;
}

/// Outcome of routing a key through the cluster.
pub enum PeerChoice {
    /// No routable owner (empty ring, or owner has no client yet)
    None,
    /// The ring maps the key to this node; handle it locally
    SelfNode,
    /// The key belongs to a remote peer
    Remote(Arc<dyn Peer>),
}

/// Picks the owning peer for a key.
pub trait PeerPicker: Send + Sync {
    fn pick_peer(&self, key: &str) -> PeerChoice;
}

/// Options for [`ClientPicker`].
#[derive(Debug, Clone, Default)]
pub struct PickerOptions {
    /// Service name to discover; defaults to [`registry::DEFAULT_SERVICE_NAME`]
    pub svc_name: Option<String>,
    /// Coordination-store connection parameters
    pub registry: RegistryConfig,
    /// Ring tuning
    pub ring: RingConfig,
}

/// Watches cluster membership and maintains one client per peer.
pub struct ClientPicker {
    self_addr: String,
    svc_name: String,
    ring: HashRing,
    clients: RwLock<HashMap<String, Arc<HttpPeer>>>,
    cancel: CancellationToken,
}

impl ClientPicker {
    /// Connects to the coordination store, loads the current membership
    /// and starts the watch and ring-balancer tasks.
    pub async fn new(self_addr: &str, options: PickerOptions) -> Result<Arc<Self>> {
        let svc_name = options
            .svc_name
            .unwrap_or_else(|| registry::DEFAULT_SERVICE_NAME.to_string());

        let mut etcd = registry::connect(&options.registry).await?;

        let picker = Arc::new(Self {
            self_addr: self_addr.to_string(),
            svc_name,
            ring: HashRing::new(options.ring),
            clients: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        });

        picker.fetch_all_services(&mut etcd).await?;

        tokio::spawn(watch_services(
            picker.clone(),
            etcd,
            picker.cancel.child_token(),
        ));
        tokio::spawn(balance_ring(picker.clone(), picker.cancel.child_token()));

        Ok(picker)
    }

    /// Addresses of the peers currently known to this picker.
    pub fn peer_addrs(&self) -> Vec<String> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Stops the watcher and balancer and forgets all peers.
    pub fn close(&self) {
        self.cancel.cancel();
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    async fn fetch_all_services(&self, etcd: &mut etcd_client::Client) -> Result<()> {
        let prefix = registry::service_prefix(&self.svc_name);
        let resp = etcd
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| {
                crate::error::CacheError::Registry(format!("failed to list services: {e}"))
            })?;

        for kv in resp.kvs() {
            let addr = kv.value_str().unwrap_or("");
            if !addr.is_empty() && addr != self.self_addr {
                self.add_peer(addr);
            }
        }
        Ok(())
    }

    fn add_peer(&self, addr: &str) {
        let mut clients = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if clients.contains_key(addr) {
            return;
        }

        match HttpPeer::new(addr) {
            Ok(peer) => {
                if let Err(e) = self.ring.add(&[addr]) {
                    warn!(%addr, error = %e, "failed to add peer to ring");
                    return;
                }
                clients.insert(addr.to_string(), Arc::new(peer));
                info!(%addr, "peer joined");
            }
            Err(e) => warn!(%addr, error = %e, "failed to create peer client"),
        }
    }

    fn remove_peer(&self, addr: &str) {
        let mut clients = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if clients.remove(addr).is_some() {
            if let Err(e) = self.ring.remove(addr) {
                warn!(%addr, error = %e, "failed to remove peer from ring");
            }
            info!(%addr, "peer left");
        }
    }
}

impl PeerPicker for ClientPicker {
    fn pick_peer(&self, key: &str) -> PeerChoice {
        let Some(addr) = self.ring.get(key) else {
            return PeerChoice::None;
        };

        if addr == self.self_addr {
            return PeerChoice::SelfNode;
        }

        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        match clients.get(&addr) {
            Some(peer) => PeerChoice::Remote(peer.clone()),
            None => PeerChoice::None,
        }
    }
}

/// Applies membership changes as they happen. PUT events carry the
/// address in the value; DELETE events only carry the key, so the
/// address is recovered from the key suffix.
async fn watch_services(
    picker: Arc<ClientPicker>,
    mut etcd: etcd_client::Client,
    cancel: CancellationToken,
) {
    let prefix = registry::service_prefix(&picker.svc_name);
    let (mut watcher, mut stream) = match etcd
        .watch(prefix, Some(WatchOptions::new().with_prefix()))
        .await
    {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "failed to start membership watch");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = watcher.cancel().await;
                return;
            }
            msg = stream.message() => {
                let resp = match msg {
                    Ok(Some(resp)) => resp,
                    Ok(None) => {
                        warn!("membership watch stream closed");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "membership watch failed");
                        return;
                    }
                };

                for event in resp.events() {
                    let Some(kv) = event.kv() else { continue };
                    match event.event_type() {
                        EventType::Put => {
                            let addr = kv.value_str().unwrap_or("");
                            if !addr.is_empty() && addr != picker.self_addr {
                                picker.add_peer(addr);
                            }
                        }
                        EventType::Delete => {
                            let key = String::from_utf8_lossy(kv.key());
                            if let Some(addr) = registry::addr_from_key(&key, &picker.svc_name) {
                                if addr != picker.self_addr {
                                    picker.remove_peer(&addr);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Periodic tick driving the ring's adaptive rebalance.
async fn balance_ring(picker: Arc<ClientPicker>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                picker.ring.check_and_rebalance();
            }
        }
    }
}
