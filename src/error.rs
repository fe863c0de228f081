//! Error types for the cache
//!
//! Provides unified error handling using thiserror. Errors are `Clone` so
//! that singleflight waiters can share the leader's failure.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The caller supplied an empty key
    #[error("cache: key is required")]
    KeyRequired,

    /// The caller supplied an empty value on Set
    #[error("cache: value is required")]
    ValueRequired,

    /// The group has been closed
    #[error("cache: group is closed")]
    GroupClosed,

    /// No group registered under the given name
    #[error("group {0} not found")]
    GroupNotFound(String),

    /// The data source failed for a key
    #[error("failed to load {key}: {message}")]
    Load { key: String, message: String },

    /// A peer RPC failed or returned a miss
    #[error("peer request failed: {0}")]
    Peer(String),

    /// Service registration or lease maintenance failed
    #[error("registry: {0}")]
    Registry(String),

    /// Invariant violation inside the cache machinery
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::KeyRequired | CacheError::ValueRequired => StatusCode::BAD_REQUEST,
            CacheError::GroupClosed => StatusCode::CONFLICT,
            CacheError::GroupNotFound(_) => StatusCode::NOT_FOUND,
            CacheError::Load { .. } => StatusCode::BAD_GATEWAY,
            CacheError::Peer(_) | CacheError::Registry(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
