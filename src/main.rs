use std::sync::Arc;
use std::time::Duration;

use shardcache::cluster::picker::{PeerPicker, PickerOptions};
use shardcache::cluster::registry::RegistryConfig;
use shardcache::cluster::server::{Server, ServerOptions};
use shardcache::{FnLoader, GroupOptions, GroupRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!(
            "Usage: {} --addr <host:port> [--service <name>] [--etcd <endpoint>]... [--group <name>] [--max-bytes <n>]",
            args[0]
        );
        eprintln!("Example: {} --addr 127.0.0.1:8001", args[0]);
        eprintln!(
            "Example: {} --addr 127.0.0.1:8002 --etcd localhost:2379 --group users",
            args[0]
        );
        std::process::exit(1);
    }

    let mut addr: Option<String> = None;
    let mut service = "shardcache".to_string();
    let mut etcd_endpoints: Vec<String> = Vec::new();
    let mut group_name = "demo".to_string();
    let mut max_bytes: u64 = 64 << 20;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" => {
                addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--service" => {
                service = args[i + 1].clone();
                i += 2;
            }
            "--etcd" => {
                etcd_endpoints.push(args[i + 1].clone());
                i += 2;
            }
            "--group" => {
                group_name = args[i + 1].clone();
                i += 2;
            }
            "--max-bytes" => {
                max_bytes = args[i + 1].parse()?;
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let addr = match addr {
        Some(addr) => addr,
        None => anyhow::bail!("--addr is required"),
    };
    if etcd_endpoints.is_empty() {
        etcd_endpoints.push("localhost:2379".to_string());
    }

    tracing::info!("starting node on {}", addr);

    let registry_cfg = RegistryConfig {
        endpoints: etcd_endpoints,
        ..RegistryConfig::default()
    };

    let picker = PeerPicker::new(
        &addr,
        PickerOptions {
            service: service.clone(),
            registry: registry_cfg.clone(),
            ..PickerOptions::default()
        },
    )
    .await?;

    let groups = GroupRegistry::new();
    // Stand-in origin; real deployments supply their own loader.
    let loader = Arc::new(FnLoader(|key: String| async move {
        Ok::<Vec<u8>, anyhow::Error>(format!("origin-{}", key).into_bytes())
    }));
    let group = groups.new_group(
        &group_name,
        max_bytes,
        loader,
        GroupOptions {
            peers: Some(Arc::clone(&picker)),
            expiration: Some(Duration::from_secs(300)),
            ..GroupOptions::default()
        },
    );

    let server = Arc::new(Server::new(
        &addr,
        Arc::clone(&groups),
        ServerOptions {
            service,
            registry: registry_cfg,
            ..ServerOptions::default()
        },
    ));

    let shutdown_server = Arc::clone(&server);
    let shutdown_picker = Arc::clone(&picker);
    let shutdown_group = Arc::clone(&group);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            shutdown_group.close().await;
            shutdown_picker.close().await;
            shutdown_server.shutdown().await;
        }
    });

    server.start().await
}
