//! Error types for the cache.
//!
//! Data-plane failures are a single `thiserror` enum. Every variant carries
//! owned data only, so errors can be cloned and shared across all callers
//! coalesced onto one origin load.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Unified error type for cache operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A key was required but empty.
    #[error("key is empty")]
    EmptyKey,

    /// A value was required but empty.
    #[error("value is empty")]
    EmptyValue,

    /// The group has been closed; all operations are rejected.
    #[error("group is closed")]
    Closed,

    /// An RPC referenced a group this node does not host.
    #[error("group {0} not found")]
    GroupNotFound(String),

    /// The configured load deadline elapsed before the origin answered.
    #[error("load deadline exceeded")]
    DeadlineExceeded,

    /// The store refused the write. The LRU policies never report this;
    /// it is reserved for capacity-erroring store implementations.
    #[error("cache full: {0}")]
    CacheFull(String),

    /// A request to a remote peer failed.
    #[error("peer request failed: {0}")]
    Peer(String),

    /// The application-supplied origin loader failed.
    #[error("failed to load from origin: {0}")]
    Loader(String),
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::EmptyKey | CacheError::EmptyValue => StatusCode::BAD_REQUEST,
            CacheError::GroupNotFound(_) => StatusCode::NOT_FOUND,
            CacheError::Closed => StatusCode::CONFLICT,
            CacheError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            CacheError::CacheFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Peer(_) | CacheError::Loader(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
