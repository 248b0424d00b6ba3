//! Service registration against the coordination store.
//!
//! A node advertises itself as `/services/<svc>/<addr>` bound to a TTL
//! lease. As long as the keepalive loop runs, the registration stays; when
//! the node stops (or dies), the lease expires and peers see the delete.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use etcd_client::{Client, ConnectOptions, PutOptions};
use tokio::sync::watch;

use super::protocol::service_key;

/// Connection parameters for the coordination store.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    pub endpoints: Vec<String>,
    pub dial_timeout: Duration,
    /// Lease TTL in seconds; the advertisement disappears this long after
    /// the last successful keepalive.
    pub lease_ttl: i64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["localhost:2379".to_string()],
            dial_timeout: Duration::from_secs(5),
            lease_ttl: 10,
        }
    }
}

pub(crate) async fn connect(cfg: &RegistryConfig) -> Result<Client> {
    let opts = ConnectOptions::new().with_connect_timeout(cfg.dial_timeout);
    Client::connect(cfg.endpoints.clone(), Some(opts))
        .await
        .context("failed to connect to coordination store")
}

/// Registers `addr` under the service prefix and keeps the lease alive
/// until `stop` fires, then revokes it. Returns an error if the keepalive
/// stream dies; the caller decides whether that is fatal (it normally is
/// not — the node keeps serving local traffic while unadvertised).
pub async fn register(
    service: &str,
    addr: &str,
    cfg: RegistryConfig,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    let mut client = connect(&cfg).await?;

    let lease = client
        .lease_grant(cfg.lease_ttl, None)
        .await
        .context("lease grant failed")?;
    let lease_id = lease.id();

    client
        .put(
            service_key(service, addr),
            addr,
            Some(PutOptions::new().with_lease(lease_id)),
        )
        .await
        .context("service registration failed")?;

    let (mut keeper, mut responses) = client
        .lease_keep_alive(lease_id)
        .await
        .context("keepalive stream failed")?;
    tracing::info!("registered {} under service {}", addr, service);

    let period = Duration::from_secs((cfg.lease_ttl as u64 / 3).max(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        if *stop.borrow() {
            client.lease_revoke(lease_id).await.ok();
            tracing::info!("revoked lease for {}", addr);
            return Ok(());
        }
        tokio::select! {
            _ = stop.changed() => {
                client.lease_revoke(lease_id).await.ok();
                tracing::info!("revoked lease for {}", addr);
                return Ok(());
            }
            _ = ticker.tick() => {
                keeper.keep_alive().await.context("lease keepalive failed")?;
            }
            message = responses.message() => {
                match message.context("keepalive stream error")? {
                    Some(response) => {
                        tracing::debug!("lease {} refreshed, ttl {}s", response.id(), response.ttl());
                    }
                    None => bail!("keepalive stream closed unexpectedly"),
                }
            }
        }
    }
}
