//! API Handlers
//!
//! HTTP request handlers. Groups are resolved by name from the
//! process-wide registry; unknown names map to 404. The `/_cache`
//! handlers carry cluster-internal traffic: writes arriving there are
//! flagged as peer-originated before they reach the group, so a
//! receiving node never propagates them a second time, even if the
//! sender failed to mark the request.

use axum::{
    body::Bytes,
    extract::Path,
    Json,
};

use crate::error::{CacheError, Result};
use crate::group::{get_group, list_groups, Group, GroupStatsSnapshot};
use crate::models::{
    DeleteResponse, GetResponse, GroupListResponse, HealthResponse, RpcDeleteResponse, SetRequest,
    SetResponse,
};

use std::sync::Arc;
use std::time::Duration;

fn resolve(group: &str) -> Result<Arc<Group>> {
    get_group(group).ok_or_else(|| CacheError::GroupNotFound(group.to_string()))
}

/// Handler for PUT /api/:group/set
pub async fn set_handler(
    Path(group): Path<String>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    let group = resolve(&group)?;
    let ttl = req.ttl_seconds.map(Duration::from_secs);
    group.set_with_ttl(&req.key, req.value.as_bytes(), ttl, false)?;
    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /api/:group/get/:key
pub async fn get_handler(
    Path((group, key)): Path<(String, String)>,
) -> Result<Json<GetResponse>> {
    let group = resolve(&group)?;
    let view = group.get(&key).await?;
    Ok(Json(GetResponse::new(key, view.to_string())))
}

/// Handler for DELETE /api/:group/del/:key
pub async fn delete_handler(
    Path((group, key)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>> {
    let group = resolve(&group)?;
    group.delete(&key, false)?;
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /api/:group/stats
pub async fn stats_handler(Path(group): Path<String>) -> Result<Json<GroupStatsSnapshot>> {
    let group = resolve(&group)?;
    Ok(Json(group.stats()))
}

/// Handler for GET /groups
pub async fn groups_handler() -> Json<GroupListResponse> {
    let mut groups = list_groups();
    groups.sort();
    Json(GroupListResponse { groups })
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Handler for GET /_cache/:group/:key
///
/// Serves a peer's read with the raw value bytes.
pub async fn rpc_get_handler(Path((group, key)): Path<(String, String)>) -> Result<Vec<u8>> {
    let group = resolve(&group)?;
    let view = group.get(&key).await?;
    Ok(view.to_vec())
}

/// Handler for PUT /_cache/:group/:key
///
/// Applies a propagated write. Echoes the value on success.
pub async fn rpc_set_handler(
    Path((group, key)): Path<(String, String)>,
    body: Bytes,
) -> Result<Vec<u8>> {
    let group = resolve(&group)?;
    group.set(&key, &body, true)?;
    Ok(body.to_vec())
}

/// Handler for DELETE /_cache/:group/:key
///
/// Applies a propagated delete.
pub async fn rpc_delete_handler(
    Path((group, key)): Path<(String, String)>,
) -> Result<Json<RpcDeleteResponse>> {
    let group = resolve(&group)?;
    group.delete(&key, true)?;
    Ok(Json(RpcDeleteResponse { value: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{destroy_group, new_group, GroupOptions, SourceFn};

    fn source_not_found() -> Arc<dyn crate::group::DataSource> {
        Arc::new(SourceFn(|key: String| async move {
            Err(anyhow::anyhow!("no origin data for {key}"))
        }))
    }

    #[tokio::test]
    async fn test_set_and_get_handlers() {
        new_group("h-roundtrip", 0, source_not_found(), GroupOptions::default());

        let req = SetRequest {
            key: "k".to_string(),
            value: "v".to_string(),
            ttl_seconds: None,
        };
        set_handler(Path("h-roundtrip".to_string()), Json(req))
            .await
            .unwrap();

        let resp = get_handler(Path(("h-roundtrip".to_string(), "k".to_string())))
            .await
            .unwrap();
        assert_eq!(resp.value, "v");

        destroy_group("h-roundtrip");
    }

    #[tokio::test]
    async fn test_unknown_group_maps_to_not_found() {
        let err = get_handler(Path(("h-ghost".to_string(), "k".to_string())))
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::GroupNotFound("h-ghost".to_string()));
    }

    #[tokio::test]
    async fn test_rpc_set_marks_write_as_peer_originated() {
        use crate::peers::{Peer, PeerChoice, PeerPicker};
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingPeer(AtomicUsize);

        #[async_trait::async_trait]
        impl Peer for CountingPeer {
            async fn get(&self, _g: &str, key: &str) -> Result<Vec<u8>> {
                Err(CacheError::Peer(format!("no value for {key}")))
            }
            async fn set(&self, _g: &str, _k: &str, _v: &[u8]) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            async fn delete(&self, _g: &str, _k: &str) -> Result<bool> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
        }

        struct AlwaysRemote(Arc<CountingPeer>);
        impl PeerPicker for AlwaysRemote {
            fn pick_peer(&self, _key: &str) -> PeerChoice {
                PeerChoice::Remote(self.0.clone())
            }
        }

        let peer = Arc::new(CountingPeer(AtomicUsize::new(0)));
        let group = new_group("h-rpc-set", 0, source_not_found(), GroupOptions::default());
        group.register_peers(Arc::new(AlwaysRemote(peer.clone())));

        rpc_set_handler(
            Path(("h-rpc-set".to_string(), "k".to_string())),
            Bytes::from_static(b"v"),
        )
        .await
        .unwrap();
        rpc_delete_handler(Path(("h-rpc-set".to_string(), "k".to_string())))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        // Writes received over /_cache never fan back out.
        assert_eq!(peer.0.load(Ordering::SeqCst), 0);

        destroy_group("h-rpc-set");
    }
}
