//! The relay binary: a stateless, per-owner range-reconciliation sync
//! server (§4.5, §6). Hosts `/sync` (HTTP) and `/ws` (WebSocket) over an
//! in-memory [`riftdb_relay::storage::RelayStore`].

use std::sync::Arc;

use clap::Parser;
use riftdb_core::config::ReconcileConfig;
use riftdb_relay::network::{NetworkConfig, NetworkModule};
use riftdb_relay::storage::InMemoryRelayStore;
use tracing_subscriber::EnvFilter;

/// CLI flags per §6: `--port`, `--data-dir`, `--log`.
#[derive(Debug, Parser)]
#[command(name = "riftdb-relay", about = "Stateless range-reconciliation relay")]
struct Args {
    /// Port to listen on. 0 means OS-assigned.
    #[arg(long, env = "RIFTDB_RELAY_PORT", default_value_t = 0)]
    port: u16,

    /// Directory for future persistent storage backends.
    ///
    /// Unused by the default in-memory `RelayStore`; accepted now so a
    /// persistent implementation can be swapped in without changing the CLI
    /// surface.
    #[arg(long, env = "RIFTDB_RELAY_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log filter directive, e.g. `info` or `riftdb_relay=debug,info`.
    #[arg(long, env = "RIFTDB_RELAY_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log))
        .json()
        .init();

    if let Some(data_dir) = &args.data_dir {
        tracing::info!(data_dir = %data_dir.display(), "data-dir configured but unused by the in-memory store");
    }

    let mut network_config = NetworkConfig::default();
    network_config.port = args.port;

    let store: Arc<dyn riftdb_relay::storage::RelayStore> = Arc::new(InMemoryRelayStore::new());
    let mut module = NetworkModule::new(network_config, store, ReconcileConfig::default());

    let port = module.start().await?;
    tracing::info!(port, "riftdb relay listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };

    module.serve(shutdown).await
}
