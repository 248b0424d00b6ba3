//! Peer membership and selection.
//!
//! The picker owns the consistent-hash ring and one client per live peer.
//! Construction seeds both from a one-shot range read of the service prefix;
//! afterwards a watch on the same prefix applies puts and deletes as they
//! happen, so the view is eventually consistent with the registry. Stale
//! picks during a transition are expected and harmless: a forwarded request
//! to a departed node fails its RPC and the group falls back to its loader.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use etcd_client::{Event, EventType, GetOptions, WatchOptions};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::client::PeerClient;
use super::protocol::{service_prefix, DEFAULT_SERVICE};
use super::registry::{self, RegistryConfig};
use crate::routing::{HashRing, RingOptions};

const WATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct PickerOptions {
    pub service: String,
    pub registry: RegistryConfig,
    pub ring: RingOptions,
    /// When set, a background tick applies load-aware replica adjustment.
    pub rebalance_interval: Option<Duration>,
}

impl Default for PickerOptions {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            registry: RegistryConfig::default(),
            ring: RingOptions::default(),
            rebalance_interval: None,
        }
    }
}

/// Where a key's owner lives.
pub enum PickedPeer {
    /// This node owns the key.
    Local,
    /// A connected remote peer owns the key.
    Remote(Arc<PeerClient>),
}

struct Membership {
    ring: HashRing,
    clients: HashMap<String, Arc<PeerClient>>,
}

pub struct PeerPicker {
    self_addr: String,
    service: String,
    members: RwLock<Membership>,
    etcd: etcd_client::Client,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerPicker {
    /// Connects to the coordination store, seeds the membership view and
    /// starts the watch loop.
    pub async fn new(self_addr: &str, opts: PickerOptions) -> Result<Arc<Self>> {
        let etcd = registry::connect(&opts.registry).await?;

        let mut ring = HashRing::new(opts.ring.clone());
        // The local node is part of the ownership view from the start;
        // discovery below only ever adds the others.
        ring.add(self_addr);

        let picker = Arc::new(Self {
            self_addr: self_addr.to_string(),
            service: opts.service.clone(),
            members: RwLock::new(Membership {
                ring,
                clients: HashMap::new(),
            }),
            etcd,
            stop: watch::channel(false).0,
            tasks: Mutex::new(Vec::new()),
        });

        picker.fetch_all().await?;

        let watcher = Arc::clone(&picker);
        let handle = tokio::spawn(async move { watcher.watch_loop().await });
        picker.tasks.lock().unwrap().push(handle);

        if let Some(every) = opts.rebalance_interval {
            let adjuster = Arc::clone(&picker);
            let handle = tokio::spawn(async move { adjuster.rebalance_loop(every).await });
            picker.tasks.lock().unwrap().push(handle);
        }

        Ok(picker)
    }

    /// Routes a key to its owner under the shared lock. `None` means the
    /// owner is not reachable through this picker right now.
    pub fn pick_peer(&self, key: &str) -> Option<PickedPeer> {
        let members = self.members.read().unwrap();
        let owner = members.ring.get(key)?.to_string();
        if owner == self.self_addr {
            return Some(PickedPeer::Local);
        }
        members
            .clients
            .get(&owner)
            .map(|client| PickedPeer::Remote(Arc::clone(client)))
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    /// Addresses of the currently connected remote peers.
    pub fn peers(&self) -> Vec<String> {
        let members = self.members.read().unwrap();
        let mut peers: Vec<String> = members.clients.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Virtual positions currently on the ring.
    pub fn ring_len(&self) -> usize {
        self.members.read().unwrap().ring.len()
    }

    /// Stops the background loops, waits for them to exit and releases
    /// every owned peer connection. Safe to call more than once.
    pub async fn close(&self) {
        self.stop.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            task.await.ok();
        }
    }

    async fn fetch_all(&self) -> Result<()> {
        let mut etcd = self.etcd.clone();
        let response = etcd
            .get(
                service_prefix(&self.service),
                Some(GetOptions::new().with_prefix()),
            )
            .await
            .context("service range read failed")?;

        let mut members = self.members.write().unwrap();
        for kv in response.kvs() {
            let addr = match kv.value_str() {
                Ok(addr) => addr,
                Err(_) => continue,
            };
            if !addr.is_empty() && addr != self.self_addr {
                Self::add_peer(&mut members, addr);
                tracing::info!("discovered service at {}", addr);
            }
        }
        Ok(())
    }

    fn add_peer(members: &mut Membership, addr: &str) {
        if members.clients.contains_key(addr) {
            return;
        }
        members
            .clients
            .insert(addr.to_string(), Arc::new(PeerClient::new(addr)));
        members.ring.add(addr);
    }

    fn remove_peer(members: &mut Membership, addr: &str) {
        members.ring.remove(addr);
        members.clients.remove(addr);
    }

    async fn watch_loop(self: Arc<Self>) {
        let mut stop = self.stop.subscribe();
        loop {
            if *stop.borrow_and_update() {
                return;
            }

            let mut etcd = self.etcd.clone();
            let watching = etcd
                .watch(
                    service_prefix(&self.service),
                    Some(WatchOptions::new().with_prefix()),
                )
                .await;
            let (mut watcher, mut stream) = match watching {
                Ok(pair) => pair,
                Err(error) => {
                    tracing::warn!("service watch failed: {}; retrying", error);
                    tokio::select! {
                        _ = stop.changed() => return,
                        _ = tokio::time::sleep(WATCH_RETRY_DELAY) => continue,
                    }
                }
            };

            loop {
                tokio::select! {
                    _ = stop.changed() => {
                        watcher.cancel().await.ok();
                        self.release_peers();
                        return;
                    }
                    message = stream.message() => match message {
                        Ok(Some(response)) => self.handle_events(response.events()),
                        Ok(None) => {
                            tracing::warn!("service watch stream ended; re-watching");
                            break;
                        }
                        Err(error) => {
                            tracing::warn!("service watch error: {}; re-watching", error);
                            break;
                        }
                    }
                }
            }

            tokio::select! {
                _ = stop.changed() => {
                    self.release_peers();
                    return;
                }
                _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
            }
        }
    }

    fn handle_events(&self, events: &[Event]) {
        let prefix = service_prefix(&self.service);
        let mut members = self.members.write().unwrap();
        for event in events {
            let Some(kv) = event.kv() else { continue };
            match event.event_type() {
                EventType::Put => {
                    let addr = match kv.value_str() {
                        Ok(addr) => addr.to_string(),
                        Err(_) => continue,
                    };
                    if addr.is_empty() || addr == self.self_addr {
                        continue;
                    }
                    // A put for a known address is a lease refresh.
                    if !members.clients.contains_key(&addr) {
                        Self::add_peer(&mut members, &addr);
                        tracing::info!("new service discovered at {}", addr);
                    }
                }
                EventType::Delete => {
                    // Delete events carry no value; the address is the key
                    // suffix under the service prefix.
                    let key = match kv.key_str() {
                        Ok(key) => key,
                        Err(_) => continue,
                    };
                    let addr = key.strip_prefix(prefix.as_str()).unwrap_or(key).to_string();
                    if addr == self.self_addr {
                        continue;
                    }
                    if members.clients.contains_key(&addr) {
                        Self::remove_peer(&mut members, &addr);
                        tracing::info!("service removed at {}", addr);
                    }
                }
            }
        }
    }

    fn release_peers(&self) {
        let mut members = self.members.write().unwrap();
        members.clients.clear();
    }

    async fn rebalance_loop(self: Arc<Self>, every: Duration) {
        let mut stop = self.stop.subscribe();
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = stop.changed() => return,
                _ = ticker.tick() => {
                    self.members.write().unwrap().ring.rebalance();
                }
            }
        }
    }
}

impl Drop for PeerPicker {
    fn drop(&mut self) {
        // Drop cannot wait; the loops still exit on the stop signal.
        self.stop.send_replace(true);
    }
}
