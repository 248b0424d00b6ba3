//! Distributed read-through/write-through in-memory cache.
//!
//! A cluster of peer nodes cooperatively serves cached values on behalf of
//! an application. Every node owns a shard of the keyspace, decided by a
//! consistent-hash ring that all nodes derive from the same service
//! registry; any node can take a request and route it to the owner. When
//! the owner misses, it loads from the application's origin and caches the
//! result under a named group.
//!
//! ## Architecture Modules
//! The crate is composed of small, separately testable subsystems:
//!
//! - **`value`**: the immutable byte view handed to callers.
//! - **`store`**: the storage engines — a byte-bounded LRU with TTLs and a
//!   background reaper, and a sharded two-level LRU that resists scan
//!   pollution.
//! - **`cache`**: the lazily initialized, hit/miss-counting front over a
//!   store.
//! - **`singleflight`**: per-key coalescing of concurrent origin loads.
//! - **`routing`**: the consistent-hash ring with virtual nodes.
//! - **`cluster`**: peer discovery over a lease-based registry, plus the
//!   HTTP RPC client/server adapters between nodes.
//! - **`group`**: named keyspaces tying cache, loader, routing and write
//!   synchronization together.

pub mod cache;
pub mod cluster;
pub mod error;
pub mod group;
pub mod routing;
pub mod singleflight;
pub mod store;
pub mod value;

pub use cache::{Cache, CacheStats};
pub use error::{CacheError, Result};
pub use group::{FnLoader, Group, GroupOptions, GroupRegistry, GroupStats, Loader};
pub use value::ByteView;
