//! Group layer: named keyspaces over the cache and the cluster.
//!
//! A group ties together a local cache, an application-supplied origin
//! loader, an optional peer picker and a single-flight coordinator. Reads
//! flow local cache → owning peer → loader; writes apply locally and are
//! unicast asynchronously to the key's owner. Writes that *arrived* from a
//! peer enter through [`Group::set_from_peer`] / [`Group::delete_from_peer`]
//! and are never forwarded again, which terminates propagation after one
//! hop.

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::{Cache, CacheStats};
use crate::cluster::picker::{PeerPicker, PickedPeer};
use crate::error::{CacheError, Result};
use crate::singleflight::SingleFlight;
use crate::store::StoreOptions;
use crate::value::ByteView;

/// Fetches the authoritative value for a key when every cache level misses.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapter letting a plain async closure act as a [`Loader`].
pub struct FnLoader<F>(pub F);

#[async_trait]
impl<F, Fut> Loader for FnLoader<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Vec<u8>>> + Send,
{
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.0)(key.to_string()).await
    }
}

/// Optional group knobs; everything here has a working zero value.
#[derive(Clone, Default)]
pub struct GroupOptions {
    /// Default TTL applied to entries this group caches.
    pub expiration: Option<Duration>,
    /// Cluster routing; a group without a picker is purely local.
    pub peers: Option<Arc<PeerPicker>>,
    /// Cache tuning; `max_bytes` is always overridden by the group cap.
    pub cache: Option<StoreOptions>,
    /// Deadline for one origin load.
    pub load_timeout: Option<Duration>,
}

/// Process-wide name → group map. The RPC server dispatches inbound
/// operations through it; owning it explicitly (instead of a module-level
/// global) keeps multi-tenant servers possible in one process.
pub struct GroupRegistry {
    groups: DashMap<String, Arc<Group>>,
}

impl GroupRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            groups: DashMap::new(),
        })
    }

    /// Creates a group and registers it under its name. A name collision
    /// replaces the previous group.
    pub fn new_group(
        self: &Arc<Self>,
        name: &str,
        max_bytes: u64,
        loader: Arc<dyn Loader>,
        opts: GroupOptions,
    ) -> Arc<Group> {
        let mut cache_opts = opts.cache.clone().unwrap_or_default();
        cache_opts.max_bytes = max_bytes;

        let group = Arc::new(Group {
            name: name.to_string(),
            loader,
            cache: Cache::new(cache_opts),
            peers: opts.peers.clone(),
            flight: SingleFlight::new(),
            expiration: opts.expiration,
            load_timeout: opts.load_timeout,
            closed: AtomicBool::new(false),
            stats: Stats::default(),
            registry: Arc::downgrade(self),
        });

        if self.groups.insert(name.to_string(), Arc::clone(&group)).is_some() {
            tracing::warn!("group {} already exists, replacing it", name);
        }
        tracing::info!(
            "group {} created with max_bytes={} expiration={:?}",
            name,
            max_bytes,
            opts.expiration
        );
        group
    }

    pub fn get(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Unregisters `target` unless its name now maps to a newer group.
    fn remove(&self, name: &str, target: &Arc<Group>) {
        self.groups
            .remove_if(name, |_, current| Arc::ptr_eq(current, target));
    }
}

#[derive(Default)]
struct Stats {
    loads: AtomicU64,
    local_hits: AtomicU64,
    local_misses: AtomicU64,
    peer_hits: AtomicU64,
    peer_misses: AtomicU64,
    loader_hits: AtomicU64,
    loader_errors: AtomicU64,
    load_duration_ns: AtomicU64,
}

/// Point-in-time snapshot of a group's counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupStats {
    pub loads: u64,
    pub local_hits: u64,
    pub local_misses: u64,
    pub peer_hits: u64,
    pub peer_misses: u64,
    pub loader_hits: u64,
    pub loader_errors: u64,
    pub load_duration: Duration,
    pub cache: CacheStats,
}

/// A named keyspace with an independent cache, loader and statistics.
pub struct Group {
    name: String,
    loader: Arc<dyn Loader>,
    cache: Cache,
    peers: Option<Arc<PeerPicker>>,
    flight: SingleFlight<ByteView>,
    expiration: Option<Duration>,
    load_timeout: Option<Duration>,
    closed: AtomicBool,
    stats: Stats,
    registry: Weak<GroupRegistry>,
}

impl Group {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read-through lookup: local cache, then the owning peer, then the
    /// origin loader. Concurrent misses for one key coalesce onto a single
    /// load.
    pub async fn get(&self, key: &str) -> Result<ByteView> {
        self.check_open()?;
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        if let Some(view) = self.cache.get(key) {
            self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(view);
        }
        self.stats.local_misses.fetch_add(1, Ordering::Relaxed);

        self.load(key).await
    }

    /// Client-originated write: applies locally, then unicasts to the
    /// key's owner in the background.
    pub async fn set(self: &Arc<Self>, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_open()?;
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        if value.is_empty() {
            return Err(CacheError::EmptyValue);
        }

        self.populate(key, ByteView::from(value.clone()));

        if self.peers.is_some() {
            let group = Arc::clone(self);
            let key = key.to_string();
            tokio::spawn(async move { group.sync_set(&key, value).await });
        }
        Ok(())
    }

    /// Client-originated delete; symmetric to [`set`](Self::set).
    pub async fn delete(self: &Arc<Self>, key: &str) -> Result<()> {
        self.check_open()?;
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        self.cache.delete(key);

        if self.peers.is_some() {
            let group = Arc::clone(self);
            let key = key.to_string();
            tokio::spawn(async move { group.sync_delete(&key).await });
        }
        Ok(())
    }

    /// Peer-originated write: applies locally and never syncs onward.
    pub fn set_from_peer(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_open()?;
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        if value.is_empty() {
            return Err(CacheError::EmptyValue);
        }
        self.populate(key, ByteView::from(value));
        Ok(())
    }

    /// Peer-originated delete: applies locally and never syncs onward.
    pub fn delete_from_peer(&self, key: &str) -> Result<()> {
        self.check_open()?;
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        self.cache.delete(key);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.check_open()?;
        self.cache.clear();
        Ok(())
    }

    /// Closes the group: the cache shuts down (joining its reaper) and the
    /// name is released. Safe to call more than once.
    pub async fn close(self: &Arc<Self>) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.cache.close().await;
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(&self.name, self);
            }
            tracing::info!("group {} closed", self.name);
        }
    }

    pub fn stats(&self) -> GroupStats {
        GroupStats {
            loads: self.stats.loads.load(Ordering::Relaxed),
            local_hits: self.stats.local_hits.load(Ordering::Relaxed),
            local_misses: self.stats.local_misses.load(Ordering::Relaxed),
            peer_hits: self.stats.peer_hits.load(Ordering::Relaxed),
            peer_misses: self.stats.peer_misses.load(Ordering::Relaxed),
            loader_hits: self.stats.loader_hits.load(Ordering::Relaxed),
            loader_errors: self.stats.loader_errors.load(Ordering::Relaxed),
            load_duration: Duration::from_nanos(self.stats.load_duration_ns.load(Ordering::Relaxed)),
            cache: self.cache.stats(),
        }
    }

    async fn load(&self, key: &str) -> Result<ByteView> {
        let result = self
            .flight
            .do_call(key, || async {
                let start = Instant::now();
                let result = self.load_data(key).await;
                self.stats
                    .load_duration_ns
                    .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
                self.stats.loads.fetch_add(1, Ordering::Relaxed);
                result
            })
            .await;

        match result {
            Ok(view) => {
                self.populate(key, view.clone());
                Ok(view)
            }
            Err(error) => {
                self.stats.loader_errors.fetch_add(1, Ordering::Relaxed);
                Err(error)
            }
        }
    }

    /// One uncoalesced load: owning peer first, origin loader as fallback.
    async fn load_data(&self, key: &str) -> Result<ByteView> {
        if let Some(picker) = &self.peers {
            if let Some(PickedPeer::Remote(peer)) = picker.pick_peer(key) {
                match peer.get(&self.name, key).await {
                    Ok(bytes) => {
                        self.stats.peer_hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(ByteView::from(bytes));
                    }
                    Err(error) => {
                        self.stats.peer_misses.fetch_add(1, Ordering::Relaxed);
                        tracing::error!("failed to get {} from peer: {:#}", key, error);
                    }
                }
            }
        }

        let load = self.loader.load(key);
        let bytes = match self.load_timeout {
            Some(limit) => match tokio::time::timeout(limit, load).await {
                Ok(result) => result,
                Err(_) => return Err(CacheError::DeadlineExceeded),
            },
            None => load.await,
        }
        .map_err(|error| CacheError::Loader(format!("{:#}", error)))?;

        self.stats.loader_hits.fetch_add(1, Ordering::Relaxed);
        Ok(ByteView::from(bytes))
    }

    fn populate(&self, key: &str, view: ByteView) {
        let result = match self.expiration {
            Some(ttl) => self
                .cache
                .add_with_expiration(key, view, Instant::now() + ttl),
            None => self.cache.add(key, view),
        };
        if let Err(error) = result {
            tracing::warn!("failed to cache {}: {}", key, error);
        }
    }

    async fn sync_set(&self, key: &str, value: Vec<u8>) {
        let Some(PickedPeer::Remote(peer)) = self.pick_owner(key) else {
            return;
        };
        if let Err(error) = peer.set(&self.name, key, value).await {
            self.stats.peer_misses.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("set sync for {} to {} failed: {:#}", key, peer.addr(), error);
        }
    }

    async fn sync_delete(&self, key: &str) {
        let Some(PickedPeer::Remote(peer)) = self.pick_owner(key) else {
            return;
        };
        if let Err(error) = peer.delete(&self.name, key).await {
            self.stats.peer_misses.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("delete sync for {} to {} failed: {:#}", key, peer.addr(), error);
        }
    }

    fn pick_owner(&self, key: &str) -> Option<PickedPeer> {
        self.peers.as_ref()?.pick_peer(key)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }
}
