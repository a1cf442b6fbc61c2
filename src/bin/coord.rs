use anyhow::Result;
use clap::Parser;
use minidfs::common::config::load_config;
use minidfs::{Coordinator, CoordinatorConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "minidfs-coord")]
#[command(about = "minidfs coordinator - namespace and block placement")]
#[command(version)]
struct Args {
    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address for the RPC listener
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Root directory for the namespace mirror and the epoch file
    #[arg(short, long)]
    meta_root: Option<PathBuf>,

    /// Replicas per block
    #[arg(short, long)]
    replication: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config: CoordinatorConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => CoordinatorConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(meta_root) = args.meta_root {
        config.meta_root = meta_root;
    }
    if let Some(replication) = args.replication {
        config.replication = replication;
    }

    tracing::info!("starting minidfs coordinator {}", minidfs::VERSION);
    Coordinator::new(config).serve().await?;
    Ok(())
}
