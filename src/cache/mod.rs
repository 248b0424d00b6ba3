//! Lazily initialized cache front with hit/miss accounting.
//!
//! The underlying store is built on first write, so a group that only ever
//! misses never pays for a store (or its reaper task). Reads on an
//! uninitialized cache count as misses without constructing anything.

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::error::Result;
use crate::store::{new_store, Storage, StoreOptions};
use crate::value::ByteView;

pub struct Cache {
    opts: StoreOptions,
    store: OnceLock<Arc<dyn Storage>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time counters for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub items: usize,
}

impl Cache {
    pub fn new(opts: StoreOptions) -> Self {
        Self {
            opts,
            store: OnceLock::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn store(&self) -> &Arc<dyn Storage> {
        self.store.get_or_init(|| new_store(self.opts.clone()))
    }

    /// Looks up a key, counting the outcome. Structurally infallible: the
    /// entry is either present or it is not.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        let Some(store) = self.store.get() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        match store.get(key) {
            Some(view) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(view)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn add(&self, key: &str, view: ByteView) -> Result<()> {
        self.store().set(key, view)
    }

    /// Inserts an entry that expires at the given instant.
    pub fn add_with_expiration(&self, key: &str, view: ByteView, expires_at: Instant) -> Result<()> {
        let ttl = expires_at.saturating_duration_since(Instant::now());
        self.store().set_with_expiration(key, view, ttl)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.get().is_some_and(|store| store.delete(key))
    }

    pub fn clear(&self) {
        if let Some(store) = self.store.get() {
            store.clear();
        }
    }

    /// Shuts the store down, waiting for its reaper to exit. A cache that
    /// was never written to has nothing to stop.
    pub async fn close(&self) {
        if let Some(store) = self.store.get() {
            store.close().await;
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            items: self.store.get().map_or(0, |store| store.len()),
        }
    }
}
