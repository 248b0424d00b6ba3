//! Byte-bounded LRU store with per-entry expiration and a background reaper.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::list::RecencyList;
use super::{EvictionCallback, Storage, StoreOptions};
use crate::error::Result;
use crate::value::ByteView;

/// Upper bound on expiry entries examined per reaper tick. Caps the write
/// lock hold time when the expiry map is large.
pub(crate) const REAP_SCAN_LIMIT: usize = 100;

/// Lock-guarded LRU store.
///
/// A single reader-writer lock guards the list, the key index and the expiry
/// map; the used-byte counter always equals the sum of `len(key) +
/// value.len()` over live entries.
pub struct LruStore {
    shared: Arc<Shared>,
}

struct Shared {
    max_bytes: u64,
    on_evicted: Option<EvictionCallback>,
    inner: RwLock<Inner>,
    closed: AtomicBool,
    stop: Notify,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    list: RecencyList,
    index: HashMap<String, usize>,
    expiries: HashMap<String, Instant>,
    used_bytes: u64,
}

impl LruStore {
    pub fn new(opts: StoreOptions) -> Self {
        let interval = if opts.reaper_interval.is_zero() {
            Duration::from_secs(60)
        } else {
            opts.reaper_interval
        };
        let shared = Arc::new(Shared {
            max_bytes: opts.max_bytes,
            on_evicted: opts.on_evicted,
            inner: RwLock::new(Inner {
                list: RecencyList::new(),
                index: HashMap::new(),
                expiries: HashMap::new(),
                used_bytes: 0,
            }),
            closed: AtomicBool::new(false),
            stop: Notify::new(),
            reaper: Mutex::new(None),
        });

        let reaper = Arc::clone(&shared);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => reaper.remove_expired(),
                    _ = reaper.stop.notified() => break,
                }
            }
        });
        *shared.reaper.lock().unwrap() = Some(handle);

        Self { shared }
    }

    /// Current byte footprint of all live entries.
    pub fn used_bytes(&self) -> u64 {
        self.shared.inner.read().unwrap().used_bytes
    }
}

#[async_trait]
impl Storage for LruStore {
    fn get(&self, key: &str) -> Option<ByteView> {
        self.shared.get(key)
    }

    fn set(&self, key: &str, value: ByteView) -> Result<()> {
        self.shared.set(key, value, None);
        Ok(())
    }

    fn set_with_expiration(&self, key: &str, value: ByteView, ttl: Duration) -> Result<()> {
        self.shared.set(key, value, Some(ttl));
        Ok(())
    }

    fn delete(&self, key: &str) -> bool {
        self.shared.delete(key)
    }

    fn clear(&self) {
        self.shared.clear();
    }

    fn len(&self) -> usize {
        self.shared.inner.read().unwrap().list.len()
    }

    async fn close(&self) {
        self.shared.close().await;
    }
}

impl Drop for LruStore {
    fn drop(&mut self) {
        // Drop cannot wait; the reaper still exits on the stop signal.
        self.shared.signal_stop();
    }
}

impl Shared {
    fn get(self: &Arc<Self>, key: &str) -> Option<ByteView> {
        let value = {
            let inner = self.inner.read().unwrap();
            let idx = match inner.index.get(key) {
                Some(idx) => *idx,
                None => return None,
            };
            if let Some(expiry) = inner.expiries.get(key) {
                if Instant::now() > *expiry {
                    drop(inner);
                    // Eviction is deferred so the read path never waits on
                    // the writer for a stale entry.
                    let shared = Arc::clone(self);
                    let key = key.to_string();
                    tokio::spawn(async move {
                        shared.delete(&key);
                    });
                    return None;
                }
            }
            inner.list.get(idx).value.clone()
        };

        let mut inner = self.inner.write().unwrap();
        // The entry may have been deleted between the two lock scopes.
        if let Some(idx) = inner.index.get(key).copied() {
            inner.list.move_to_back(idx);
        }
        Some(value)
    }

    fn set(&self, key: &str, value: ByteView, ttl: Option<Duration>) {
        let mut inner = self.inner.write().unwrap();

        match ttl {
            Some(ttl) if !ttl.is_zero() => {
                inner.expiries.insert(key.to_string(), Instant::now() + ttl);
            }
            // A plain update clears whatever expiration the entry carried.
            _ => {
                inner.expiries.remove(key);
            }
        }

        let new_len = value.len() as u64;
        if let Some(idx) = inner.index.get(key).copied() {
            let old_len = inner.list.get(idx).value.len() as u64;
            inner.list.get_mut(idx).value = value;
            inner.list.move_to_back(idx);
            inner.used_bytes = inner.used_bytes - old_len + new_len;
        } else {
            inner.used_bytes += key.len() as u64 + new_len;
            let idx = inner.list.push_back(key.to_string(), value);
            inner.index.insert(key.to_string(), idx);
        }

        while self.max_bytes > 0 && inner.used_bytes > self.max_bytes && !inner.list.is_empty() {
            if let Some(front) = inner.list.front() {
                self.remove_entry(&mut inner, front);
            }
        }
    }

    fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.index.get(key).copied() {
            Some(idx) => {
                self.remove_entry(&mut inner, idx);
                true
            }
            None => false,
        }
    }

    fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        if let Some(on_evicted) = &self.on_evicted {
            for entry in inner.list.entries() {
                on_evicted(&entry.key, &entry.value);
            }
        }
        inner.list.clear();
        inner.index.clear();
        inner.expiries.clear();
        inner.used_bytes = 0;
    }

    fn remove_expired(&self) {
        let mut inner = self.inner.write().unwrap();
        let now = Instant::now();
        let stale: Vec<String> = inner
            .expiries
            .iter()
            .take(REAP_SCAN_LIMIT)
            .filter(|(_, expiry)| now > **expiry)
            .map(|(key, _)| key.clone())
            .collect();
        let removed = stale.len();
        for key in stale {
            match inner.index.get(&key).copied() {
                Some(idx) => self.remove_entry(&mut inner, idx),
                None => {
                    inner.expiries.remove(&key);
                }
            }
        }
        if removed > 0 {
            tracing::debug!("reaper removed {} expired entries", removed);
        }
    }

    /// Caller holds the write lock.
    fn remove_entry(&self, inner: &mut Inner, idx: usize) {
        let entry = inner.list.remove(idx);
        inner.index.remove(&entry.key);
        inner.expiries.remove(&entry.key);
        inner.used_bytes -= entry.key.len() as u64 + entry.value.len() as u64;
        if let Some(on_evicted) = &self.on_evicted {
            on_evicted(&entry.key, &entry.value);
        }
    }

    async fn close(&self) {
        self.signal_stop();
        let reaper = self.reaper.lock().unwrap().take();
        if let Some(reaper) = reaper {
            reaper.await.ok();
        }
    }

    fn signal_stop(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.stop.notify_one();
        }
    }
}
