//! Peer RPC protocol.
//!
//! Defines the endpoint paths and Data Transfer Objects used for internode
//! communication. Three operations cover the whole data plane — GET, SET
//! and DELETE — each scoped to a named group, serialized as JSON and sent
//! over HTTP POST.
//!
//! Errors ride on HTTP status codes with an [`ErrorResponse`] body, so a
//! client can distinguish "the owner has no such group" from a transport
//! failure. The registration-key helpers below define the coordination
//! store layout both the registry and the picker rely on.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Fetch a value from the owning node.
pub const ENDPOINT_GET: &str = "/cache/get";
/// Push a value to the owning node.
pub const ENDPOINT_SET: &str = "/cache/set";
/// Remove a value from the owning node.
pub const ENDPOINT_DELETE: &str = "/cache/delete";

/// Default service name nodes register under.
pub const DEFAULT_SERVICE: &str = "shardcache";

/// Coordination-store prefix holding every member of a service.
pub fn service_prefix(service: &str) -> String {
    format!("/services/{}/", service)
}

/// Registration key for one member; the value is the address itself.
pub fn service_key(service: &str, addr: &str) -> String {
    format!("/services/{}/{}", service, addr)
}

// --- Data Transfer Objects ---

/// Read request routed to the node that owns the key.
///
/// Sent by a non-owner after a local miss; the owner answers from its own
/// cache or loads from the origin on the requester's behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    /// The namespace hosting the key.
    pub group: String,
    /// The data key.
    pub key: String,
}

/// Successful read reply; failures travel as an [`ErrorResponse`] instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResponse {
    /// A copy of the cached bytes.
    pub value: Vec<u8>,
}

/// Write synchronization payload.
///
/// Sent by the node where a client write originated to the key's owner.
/// The receiving server applies it as peer-originated, so the write stops
/// there instead of fanning out again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRequest {
    /// The namespace hosting the key.
    pub group: String,
    /// The data key.
    pub key: String,
    /// The raw bytes to cache.
    pub value: Vec<u8>,
}

/// Echoes the stored value back to the writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetResponse {
    pub value: Vec<u8>,
}

/// Invalidation request for the owner's copy of a key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub group: String,
    pub key: String,
}

/// `value` is true when the delete was applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub value: bool,
}

/// Error body carried on non-success status codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
