//! Peer client
//!
//! HTTP client for the `/_cache` routes another node exposes. Writes
//! carry the from-peer header so the receiver knows not to propagate
//! them again (the receiving handler enforces this regardless).

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{CacheError, Result};
use crate::peers::{Peer, FROM_PEER_HEADER};

/// A remote cache node reachable over HTTP.
pub struct HttpPeer {
    addr: String,
    http: reqwest::Client,
}

impl HttpPeer {
    pub fn new(addr: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(2))
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| CacheError::Peer(format!("failed to build client for {addr}: {e}")))?;

        Ok(Self {
            addr: addr.to_string(),
            http,
        })
    }

    /// Address this client talks to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn url(&self, group: &str, key: &str) -> String {
        format!("http://{}/_cache/{}/{}", self.addr, group, key)
    }
}

#[derive(Deserialize)]
struct DeleteReply {
    value: bool,
}

#[async_trait]
impl Peer for HttpPeer {
    async fn get(&self, group: &str, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(self.url(group, key))
            .send()
            .await
            .map_err(|e| CacheError::Peer(format!("get from {}: {e}", self.addr)))?;

        if !resp.status().is_success() {
            return Err(CacheError::Peer(format!(
                "get from {}: status {}",
                self.addr,
                resp.status()
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| CacheError::Peer(format!("get from {}: {e}", self.addr)))?;
        Ok(body.to_vec())
    }

    async fn set(&self, group: &str, key: &str, value: &[u8]) -> Result<()> {
        let resp = self
            .http
            .put(self.url(group, key))
            .header(FROM_PEER_HEADER, "1")
            .body(value.to_vec())
            .send()
            .await
            .map_err(|e| CacheError::Peer(format!("set on {}: {e}", self.addr)))?;

        if !resp.status().is_success() {
            return Err(CacheError::Peer(format!(
                "set on {}: status {}",
                self.addr,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, group: &str, key: &str) -> Result<bool> {
        let resp = self
            .http
            .delete(self.url(group, key))
            .header(FROM_PEER_HEADER, "1")
            .send()
            .await
            .map_err(|e| CacheError::Peer(format!("delete on {}: {e}", self.addr)))?;

        if !resp.status().is_success() {
            return Err(CacheError::Peer(format!(
                "delete on {}: status {}",
                self.addr,
                resp.status()
            )));
        }

        let reply: DeleteReply = resp
            .json()
            .await
            .map_err(|e| CacheError::Peer(format!("delete on {}: {e}", self.addr)))?;
        Ok(reply.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_layout() {
        let peer = HttpPeer::new("10.0.0.2:8001").unwrap();
        assert_eq!(
            peer.url("scores", "alice"),
            "http://10.0.0.2:8001/_cache/scores/alice"
        );
        assert_eq!(peer.addr(), "10.0.0.2:8001");
    }
}
