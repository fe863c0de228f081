//! Registry Module
//!
//! Registers this node in the etcd coordination store under a short
//! lease and keeps the lease alive for as long as the node runs.
//! Keep-alive failures surface on a channel so the owner can stop
//! claiming membership; deregistering revokes the lease so peers see
//! the DELETE event promptly.

use std::time::Duration;

use etcd_client::{Client, ConnectOptions, PutOptions};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{CacheError, Result};

/// Service name used when the deployment does not pick its own.
pub const DEFAULT_SERVICE_NAME: &str = "meshcache";

/// Connection and lease parameters for the coordination store.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub endpoints: Vec<String>,
    pub dial_timeout: Duration,
    pub lease_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["localhost:2379".to_string()],
            dial_timeout: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(10),
        }
    }
}

/// Prefix under which all members of a service register.
pub fn service_prefix(svc_name: &str) -> String {
    format!("/services/{svc_name}/")
}

/// Key a member registers itself under.
pub fn service_key(svc_name: &str, addr: &str) -> String {
    format!("/services/{svc_name}/{addr}")
}

/// Recovers the member address from a service key. DELETE watch events
/// carry no value, so the address rides in the key suffix.
pub fn addr_from_key(key: &str, svc_name: &str) -> Option<String> {
    key.strip_prefix(&service_prefix(svc_name))
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

/// Connects a client to the coordination store.
pub async fn connect(config: &RegistryConfig) -> Result<Client> {
    let options = ConnectOptions::new().with_connect_timeout(config.dial_timeout);
    Client::connect(&config.endpoints, Some(options))
        .await
        .map_err(|e| {
            CacheError::Registry(format!(
                "failed to connect to etcd at {}: {e}",
                config.endpoints.join(",")
            ))
        })
}

/// A live service registration backed by an etcd lease.
pub struct Registration {
    client: Client,
    lease_id: i64,
    key: String,
    cancel: CancellationToken,
    failures: mpsc::Receiver<CacheError>,
}

impl Registration {
    /// Lease id backing this registration.
    pub fn lease_id(&self) -> i64 {
        self.lease_id
    }

    /// Receives keep-alive failures. A message here means the node can
    /// no longer prove membership and should shut down.
    pub async fn failed(&mut self) -> Option<CacheError> {
        self.failures.recv().await
    }

    /// Stops the keep-alive loop and revokes the lease, removing the
    /// service key for all watchers.
    pub async fn deregister(mut self) -> Result<()> {
        self.cancel.cancel();
        self.client
            .lease_revoke(self.lease_id)
            .await
            .map_err(|e| CacheError::Registry(format!("failed to revoke lease: {e}")))?;
        info!(key = %self.key, "deregistered service");
        Ok(())
    }
}

/// Registers `addr` under `/services/<svc_name>/<addr>` with a leased
/// key and starts the keep-alive loop.
pub async fn register(config: &RegistryConfig, svc_name: &str, addr: &str) -> Result<Registration> {
    if addr.is_empty() {
        return Err(CacheError::Registry("empty address".into()));
    }

    let mut client = connect(config).await?;

    let ttl_secs = config.lease_ttl.as_secs().max(1) as i64;
    let lease = client
        .lease_grant(ttl_secs, None)
        .await
        .map_err(|e| CacheError::Registry(format!("failed to grant lease: {e}")))?;
    let lease_id = lease.id();

    let key = service_key(svc_name, addr);
    client
        .put(
            key.clone(),
            addr,
            Some(PutOptions::new().with_lease(lease_id)),
        )
        .await
        .map_err(|e| CacheError::Registry(format!("failed to put service key: {e}")))?;

    let (keeper, stream) = client
        .lease_keep_alive(lease_id)
        .await
        .map_err(|e| CacheError::Registry(format!("failed to start keep-alive: {e}")))?;

    let cancel = CancellationToken::new();
    let (failure_tx, failure_rx) = mpsc::channel(1);
    tokio::spawn(keep_alive_loop(
        keeper,
        stream,
        Duration::from_secs((ttl_secs as u64 / 3).max(1)),
        cancel.child_token(),
        failure_tx,
    ));

    info!(key = %key, lease_id, ttl_secs, "registered service");

    Ok(Registration {
        client,
        lease_id,
        key,
        cancel,
        failures: failure_rx,
    })
}

async fn keep_alive_loop(
    mut keeper: etcd_client::LeaseKeeper,
    mut stream: etcd_client::LeaseKeepAliveStream,
    interval: Duration,
    cancel: CancellationToken,
    failures: mpsc::Sender<CacheError>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        if let Err(e) = keeper.keep_alive().await {
            report(&failures, format!("lease keep-alive send failed: {e}")).await;
            return;
        }

        match stream.message().await {
            Ok(Some(resp)) if resp.ttl() > 0 => {}
            Ok(Some(_)) => {
                report(&failures, "lease expired on the server".to_string()).await;
                return;
            }
            Ok(None) => {
                report(&failures, "keep-alive stream closed".to_string()).await;
                return;
            }
            Err(e) => {
                report(&failures, format!("keep-alive stream failed: {e}")).await;
                return;
            }
        }
    }
}

async fn report(failures: &mpsc::Sender<CacheError>, message: String) {
    warn!(%message, "service registration lost");
    let _ = failures.send(CacheError::Registry(message)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_key_layout() {
        assert_eq!(service_prefix("meshcache"), "/services/meshcache/");
        assert_eq!(
            service_key("meshcache", "10.0.0.1:8001"),
            "/services/meshcache/10.0.0.1:8001"
        );
    }

    #[test]
    fn test_addr_from_key() {
        assert_eq!(
            addr_from_key("/services/meshcache/10.0.0.1:8001", "meshcache"),
            Some("10.0.0.1:8001".to_string())
        );
        assert_eq!(addr_from_key("/services/meshcache/", "meshcache"), None);
        assert_eq!(addr_from_key("/services/other/x", "meshcache"), None);
        assert_eq!(addr_from_key("garbage", "meshcache"), None);
    }
}
