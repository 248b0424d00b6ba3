//! Storage engines.
//!
//! Two eviction disciplines behind one trait:
//! - **`lru`**: a single recency list with a byte cap, per-entry expiration
//!   and a background reaper.
//! - **`lru2`**: a sharded two-level LRU where new entries prove themselves
//!   in a fresh level before promotion, so scans cannot pollute the hot set.

mod list;
pub mod lru;
pub mod lru2;


use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::value::ByteView;

/// Callback invoked whenever an entry leaves a store (eviction, expiry,
/// delete or clear). Runs under the store lock; it must not reenter the
/// store.
pub type EvictionCallback = Arc<dyn Fn(&str, &ByteView) + Send + Sync>;

/// Common surface of the storage engines.
#[async_trait]
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Option<ByteView>;

    /// Inserts or updates an entry with no expiration. Updating an entry
    /// this way clears any expiration it carried.
    fn set(&self, key: &str, value: ByteView) -> Result<()>;

    /// Inserts or updates an entry that expires `ttl` from now.
    fn set_with_expiration(&self, key: &str, value: ByteView, ttl: Duration) -> Result<()>;

    /// Removes an entry, reporting whether it existed.
    fn delete(&self, key: &str) -> bool;

    /// Drops every entry, firing the eviction callback for each.
    fn clear(&self);

    /// Number of live entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the background reaper and waits for it to exit. Safe to call
    /// more than once.
    async fn close(&self);
}

/// Which eviction discipline a cache uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Lru,
    Lru2,
}

/// Store construction parameters.
#[derive(Clone)]
pub struct StoreOptions {
    pub kind: StoreKind,
    /// Byte cap for the LRU engine; 0 means unbounded.
    pub max_bytes: u64,
    /// Shard count for the LRU2 engine.
    pub bucket_count: u16,
    /// Fresh-level entry cap per shard (LRU2).
    pub cap_per_bucket: u16,
    /// Hot-level entry cap per shard (LRU2).
    pub level2_cap: u16,
    /// How often the reaper scans for expired entries.
    pub reaper_interval: Duration,
    pub on_evicted: Option<EvictionCallback>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            kind: StoreKind::Lru,
            max_bytes: 0,
            bucket_count: 16,
            cap_per_bucket: 512,
            level2_cap: 256,
            reaper_interval: Duration::from_secs(60),
            on_evicted: None,
        }
    }
}

/// Builds the store the options describe. Must run inside a Tokio runtime:
/// both engines spawn their reaper task on construction.
pub fn new_store(opts: StoreOptions) -> Arc<dyn Storage> {
    match opts.kind {
        StoreKind::Lru => Arc::new(lru::LruStore::new(opts)),
        StoreKind::Lru2 => Arc::new(lru2::Lru2Store::new(opts)),
    }
}
