//! Sharded two-level LRU store.
//!
//! Keys hash to a fixed set of shards; each shard holds a fresh level (L1)
//! and a hot level (L2) with independent entry caps. New entries land in L1
//! and move to L2 on their first re-reference, so a one-pass scan can fill
//! L1 without displacing anything the workload actually re-reads. When L2
//! overflows, its coldest entry is discarded, never demoted back to L1.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::list::RecencyList;
use super::lru::REAP_SCAN_LIMIT;
use super::{EvictionCallback, Storage, StoreOptions};
use crate::error::Result;
use crate::value::ByteView;

pub struct Lru2Store {
    shared: Arc<Shared>,
}

struct Shared {
    shards: Vec<Mutex<Shard>>,
    cap_per_bucket: usize,
    level2_cap: usize,
    on_evicted: Option<EvictionCallback>,
    closed: AtomicBool,
    stop: Notify,
    reap_cursor: AtomicUsize,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

struct Shard {
    l1: Level,
    l2: Level,
}

/// One LRU level inside a shard: list, key index and expiry map move
/// together. A key lives in at most one level per shard.
struct Level {
    list: RecencyList,
    index: HashMap<String, usize>,
    expiries: HashMap<String, Instant>,
}

impl Level {
    fn new() -> Self {
        Self {
            list: RecencyList::new(),
            index: HashMap::new(),
            expiries: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.list.len()
    }

    fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    fn is_expired(&self, key: &str, now: Instant) -> bool {
        self.expiries.get(key).is_some_and(|expiry| now > *expiry)
    }

    fn insert(&mut self, key: &str, value: ByteView, expiry: Option<Instant>) {
        let idx = self.list.push_back(key.to_string(), value);
        self.index.insert(key.to_string(), idx);
        if let Some(at) = expiry {
            self.expiries.insert(key.to_string(), at);
        }
    }

    fn update(&mut self, key: &str, value: ByteView, expiry: Option<Instant>) {
        if let Some(idx) = self.index.get(key).copied() {
            self.list.get_mut(idx).value = value;
            self.list.move_to_back(idx);
            match expiry {
                Some(at) => {
                    self.expiries.insert(key.to_string(), at);
                }
                None => {
                    self.expiries.remove(key);
                }
            }
        }
    }

    /// Marks the entry as most recently used and returns its value.
    fn touch(&mut self, key: &str) -> Option<ByteView> {
        let idx = self.index.get(key).copied()?;
        self.list.move_to_back(idx);
        Some(self.list.get(idx).value.clone())
    }

    fn remove(&mut self, key: &str) -> Option<(String, ByteView, Option<Instant>)> {
        let idx = self.index.remove(key)?;
        let expiry = self.expiries.remove(key);
        let entry = self.list.remove(idx);
        Some((entry.key, entry.value, expiry))
    }

    fn pop_front(&mut self) -> Option<(String, ByteView)> {
        let idx = self.list.front()?;
        let entry = self.list.remove(idx);
        self.index.remove(&entry.key);
        self.expiries.remove(&entry.key);
        Some((entry.key, entry.value))
    }

    fn clear(&mut self) {
        self.list.clear();
        self.index.clear();
        self.expiries.clear();
    }
}

impl Lru2Store {
    pub fn new(opts: StoreOptions) -> Self {
        let bucket_count = opts.bucket_count.max(1) as usize;
        let interval = if opts.reaper_interval.is_zero() {
            Duration::from_secs(60)
        } else {
            opts.reaper_interval
        };
        let shards = (0..bucket_count)
            .map(|_| {
                Mutex::new(Shard {
                    l1: Level::new(),
                    l2: Level::new(),
                })
            })
            .collect();
        let shared = Arc::new(Shared {
            shards,
            cap_per_bucket: opts.cap_per_bucket.max(1) as usize,
            level2_cap: opts.level2_cap.max(1) as usize,
            on_evicted: opts.on_evicted,
            closed: AtomicBool::new(false),
            stop: Notify::new(),
            reap_cursor: AtomicUsize::new(0),
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
}

#[async_trait]
impl Storage for Lru2Store {
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
        self.shared
            .shards
            .iter()
            .map(|shard| {
                let shard = shard.lock().unwrap();
                shard.l1.len() + shard.l2.len()
            })
            .sum()
    }

    async fn close(&self) {
        self.shared.close().await;
    }
}

impl Drop for Lru2Store {
    fn drop(&mut self) {
        // Drop cannot wait; the reaper still exits on the stop signal.
        self.shared.signal_stop();
    }
}

impl Shared {
    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as usize % self.shards.len()
    }

    fn get(&self, key: &str) -> Option<ByteView> {
        let mut shard = self.shards[self.shard_index(key)].lock().unwrap();
        let now = Instant::now();

        if shard.l2.contains(key) {
            if shard.l2.is_expired(key, now) {
                if let Some((key, value, _)) = shard.l2.remove(key) {
                    self.notify_evicted(&key, &value);
                }
                return None;
            }
            return shard.l2.touch(key);
        }

        if shard.l1.contains(key) {
            if shard.l1.is_expired(key, now) {
                if let Some((key, value, _)) = shard.l1.remove(key) {
                    self.notify_evicted(&key, &value);
                }
                return None;
            }
            // First re-reference promotes the entry into the hot level.
            let (key, value, expiry) = shard.l1.remove(key)?;
            shard.l2.insert(&key, value.clone(), expiry);
            while shard.l2.len() > self.level2_cap {
                if let Some((evicted_key, evicted_value)) = shard.l2.pop_front() {
                    self.notify_evicted(&evicted_key, &evicted_value);
                }
            }
            return Some(value);
        }

        None
    }

    fn set(&self, key: &str, value: ByteView, ttl: Option<Duration>) {
        let expiry = ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| Instant::now() + ttl);
        let mut shard = self.shards[self.shard_index(key)].lock().unwrap();

        // Updates apply in whichever level holds the key.
        if shard.l2.contains(key) {
            shard.l2.update(key, value, expiry);
            return;
        }
        if shard.l1.contains(key) {
            shard.l1.update(key, value, expiry);
            return;
        }

        shard.l1.insert(key, value, expiry);
        while shard.l1.len() > self.cap_per_bucket {
            if let Some((evicted_key, evicted_value)) = shard.l1.pop_front() {
                self.notify_evicted(&evicted_key, &evicted_value);
            }
        }
    }

    fn delete(&self, key: &str) -> bool {
        let mut shard = self.shards[self.shard_index(key)].lock().unwrap();
        let removed = match shard.l2.remove(key) {
            Some(entry) => Some(entry),
            None => shard.l1.remove(key),
        };
        match removed {
            Some((key, value, _)) => {
                self.notify_evicted(&key, &value);
                true
            }
            None => false,
        }
    }

    fn clear(&self) {
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            if let Some(on_evicted) = &self.on_evicted {
                for entry in shard.l1.list.entries().chain(shard.l2.list.entries()) {
                    on_evicted(&entry.key, &entry.value);
                }
            }
            shard.l1.clear();
            shard.l2.clear();
        }
    }

    /// Round-robin expiry sweep with a global per-tick budget, so one tick
    /// never stalls every shard at once.
    fn remove_expired(&self) {
        let now = Instant::now();
        let shard_count = self.shards.len();
        let start = self.reap_cursor.fetch_add(1, Ordering::Relaxed) % shard_count;
        let mut budget = REAP_SCAN_LIMIT;

        for offset in 0..shard_count {
            if budget == 0 {
                break;
            }
            let mut shard = self.shards[(start + offset) % shard_count].lock().unwrap();
            budget = self.reap_level(&mut shard.l1, budget, now);
            budget = self.reap_level(&mut shard.l2, budget, now);
        }
    }

    fn reap_level(&self, level: &mut Level, budget: usize, now: Instant) -> usize {
        if budget == 0 {
            return 0;
        }
        let scanned = budget.min(level.expiries.len());
        let stale: Vec<String> = level
            .expiries
            .iter()
            .take(budget)
            .filter(|(_, expiry)| now > **expiry)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            if let Some((key, value, _)) = level.remove(key) {
                self.notify_evicted(&key, &value);
            }
        }
        budget - scanned
    }

    fn notify_evicted(&self, key: &str, value: &ByteView) {
        if let Some(on_evicted) = &self.on_evicted {
            on_evicted(key, value);
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
