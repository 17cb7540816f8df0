use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use podwatch::kube::{ClusterConfig, KubeClient, PodWatcher, WatchConfig};
use podwatch::server::{Server, ServerConfig};
use podwatch::{shutdown, BroadcastHub, EventRelay, SubscriberRegistry};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address the WebSocket server listens on
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Request path that is upgraded to a WebSocket
    #[arg(long, default_value = "/ws")]
    path: String,

    /// Only watch pods in this namespace (default: all namespaces)
    #[arg(short, long)]
    namespace: Option<String>,

    /// API server URL (e.g. http://127.0.0.1:8001 for kubectl proxy); in-cluster config when absent
    #[arg(long)]
    api_server: Option<String>,

    /// Bearer token file used with --api-server
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// CA bundle used with --api-server
    #[arg(long)]
    ca_file: Option<PathBuf>,

    /// Messages buffered per subscriber before it is dropped as too slow
    #[arg(long, default_value_t = 256)]
    outbound_buffer: usize,

    /// Per-frame write timeout to a subscriber, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    write_timeout_ms: u64,

    /// Time allowed for a client to complete the WebSocket upgrade, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    handshake_timeout_ms: u64,

    /// Server-side lifetime of one watch request, in seconds
    #[arg(long, default_value_t = 300)]
    watch_timeout_secs: u64,

    /// Delay before retrying a failed watch, in milliseconds
    #[arg(long, default_value_t = 2_000)]
    retry_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let cluster = match &args.api_server {
        Some(server) => {
            ClusterConfig::from_parts(server, args.token_file.as_deref(), args.ca_file.as_deref())
        }
        None => ClusterConfig::in_cluster(),
    }
    .context("Failed to load cluster configuration")?;
    info!("API server: {}", cluster.server);

    let client = KubeClient::new(&cluster).context("Failed to build API client")?;
    let registry = Arc::new(SubscriberRegistry::new());
    let hub = Arc::new(BroadcastHub::new(Arc::clone(&registry)));
    let (trigger, shutdown) = shutdown::channel();

    let server = Server::bind(
        args.bind.as_str(),
        ServerConfig {
            path: args.path.clone(),
            outbound_buffer: args.outbound_buffer,
            write_timeout: Duration::from_millis(args.write_timeout_ms),
            handshake_timeout: Duration::from_millis(args.handshake_timeout_ms),
        },
        Arc::clone(&registry),
    )
    .await
    .with_context(|| format!("Failed to bind {}", args.bind))?;

    let watcher = PodWatcher::new(
        client,
        WatchConfig {
            namespace: args.namespace.clone(),
            watch_timeout: Duration::from_secs(args.watch_timeout_secs),
            retry_delay: Duration::from_millis(args.retry_delay_ms),
        },
        shutdown.clone(),
    );
    let watch = EventRelay::new(hub)
        .subscribe(watcher)
        .await
        .context("Failed to start pod watch")?;

    let server_task = tokio::spawn(server.run(shutdown));

    wait_for_signal().await;
    info!("Shutdown requested");
    trigger.trigger();

    server_task.await.context("Server task failed")??;
    watch.join().await;
    info!("Stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
