//! RPC server side.
//!
//! Serves the three peer operations over HTTP, dispatching each to the
//! hosted group named in the request. Inbound writes are handed to the
//! groups' peer entry points, so a write that arrived from a peer can never
//! fan out again — that single rule is what prevents broadcast storms.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::post;
use axum::{Json, Router};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::protocol::{
    DeleteRequest, DeleteResponse, GetRequest, GetResponse, SetRequest, SetResponse,
    DEFAULT_SERVICE, ENDPOINT_DELETE, ENDPOINT_GET, ENDPOINT_SET,
};
use super::registry::{self, RegistryConfig};
use crate::error::CacheError;
use crate::group::GroupRegistry;

pub const DEFAULT_MAX_BODY_BYTES: usize = 4 << 20;

#[derive(Clone)]
pub struct ServerOptions {
    pub service: String,
    pub registry: RegistryConfig,
    /// Largest accepted request body; bounds SET payloads.
    pub max_body_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            registry: RegistryConfig::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

pub struct Server {
    addr: String,
    opts: ServerOptions,
    groups: Arc<GroupRegistry>,
    stop: watch::Sender<bool>,
    registration: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub fn new(addr: &str, groups: Arc<GroupRegistry>, opts: ServerOptions) -> Self {
        Self {
            addr: addr.to_string(),
            opts,
            groups,
            stop: watch::channel(false).0,
            registration: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The RPC routes over a group registry; exposed so tests can serve
    /// them on an ephemeral listener.
    pub fn router(groups: Arc<GroupRegistry>, max_body_bytes: usize) -> Router {
        Router::new()
            .route(ENDPOINT_GET, post(handle_get))
            .route(ENDPOINT_SET, post(handle_set))
            .route(ENDPOINT_DELETE, post(handle_delete))
            .layer(DefaultBodyLimit::max(max_body_bytes))
            .layer(Extension(groups))
    }

    /// Binds the listener, advertises this node in the service registry and
    /// serves peer RPCs until [`shutdown`](Self::shutdown) is called.
    /// A bind failure is fatal; a registration failure is not — the node
    /// keeps serving, merely unadvertised.
    pub async fn start(&self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.addr))?;

        let service = self.opts.service.clone();
        let addr = self.addr.clone();
        let registry_cfg = self.opts.registry.clone();
        let stop = self.stop.subscribe();
        let handle = tokio::spawn(async move {
            if let Err(error) = registry::register(&service, &addr, registry_cfg, stop).await {
                tracing::error!("service registration ended: {:#}", error);
            }
        });
        *self.registration.lock().unwrap() = Some(handle);

        let app = Self::router(Arc::clone(&self.groups), self.opts.max_body_bytes);
        tracing::info!("server listening on {}", self.addr);

        let mut stop = self.stop.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if !*stop.borrow_and_update() {
                    let _ = stop.changed().await;
                }
            })
            .await
            .context("rpc server terminated")
    }

    /// Signals the stop channel and waits for the registration task to
    /// revoke its lease and exit. The serving loop itself is joined by
    /// [`start`](Self::start) returning.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);
        let registration = self.registration.lock().unwrap().take();
        if let Some(registration) = registration {
            registration.await.ok();
        }
    }
}

async fn handle_get(
    Extension(groups): Extension<Arc<GroupRegistry>>,
    Json(req): Json<GetRequest>,
) -> std::result::Result<Json<GetResponse>, CacheError> {
    let group = groups
        .get(&req.group)
        .ok_or_else(|| CacheError::GroupNotFound(req.group.clone()))?;
    let view = group.get(&req.key).await?;
    Ok(Json(GetResponse {
        value: view.to_bytes(),
    }))
}

async fn handle_set(
    Extension(groups): Extension<Arc<GroupRegistry>>,
    Json(req): Json<SetRequest>,
) -> std::result::Result<Json<SetResponse>, CacheError> {
    let group = groups
        .get(&req.group)
        .ok_or_else(|| CacheError::GroupNotFound(req.group.clone()))?;
    // Inbound writes always count as peer-originated; they apply locally
    // and are never re-broadcast.
    group.set_from_peer(&req.key, req.value.clone())?;
    Ok(Json(SetResponse { value: req.value }))
}

async fn handle_delete(
    Extension(groups): Extension<Arc<GroupRegistry>>,
    Json(req): Json<DeleteRequest>,
) -> std::result::Result<Json<DeleteResponse>, CacheError> {
    let group = groups
        .get(&req.group)
        .ok_or_else(|| CacheError::GroupNotFound(req.group.clone()))?;
    group.delete_from_peer(&req.key)?;
    Ok(Json(DeleteResponse { value: true }))
}
