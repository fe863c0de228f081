//! Request DTOs for the HTTP API

use serde::Deserialize;

/// Request body for the SET operation (PUT /api/:group/set)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: String,
    /// Optional TTL in seconds, overriding the group policy
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}
