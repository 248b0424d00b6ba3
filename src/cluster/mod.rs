//! Cluster plane.
//!
//! Everything that makes a set of cache nodes behave as one cluster:
//! - **`registry`**: lease-based advertisement in the coordination store.
//! - **`picker`**: membership view (ring + client pool) kept eventually
//!   consistent by a prefix watch.
//! - **`protocol`**: the HTTP wire contract between peers.
//! - **`client`** / **`server`**: the RPC adapters on either end of it.

pub mod client;
pub mod picker;
pub mod protocol;
pub mod registry;
pub mod server;
