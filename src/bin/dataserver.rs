use anyhow::Result;
use clap::Parser;
use minidfs::common::config::load_config;
use minidfs::{DataServer, DataServerConfig};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "minidfs-data")]
#[command(about = "minidfs data server - block storage node")]
#[command(version)]
struct Args {
    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory for block payloads and metadata
    #[arg(short, long)]
    data_root: Option<PathBuf>,

    /// Port for the RPC listener
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind IP; resolved from the hostname when omitted
    #[arg(long)]
    bind_ip: Option<IpAddr>,

    /// Coordinator endpoint
    #[arg(short, long)]
    coordinator: Option<String>,

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

    let mut config: DataServerConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => DataServerConfig::default(),
    };
    if let Some(data_root) = args.data_root {
        config.data_root = data_root;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.bind_ip.is_some() {
        config.bind_ip = args.bind_ip;
    }
    if let Some(coordinator) = args.coordinator {
        config.coordinator = coordinator;
    }

    tracing::info!("starting minidfs data server {}", minidfs::VERSION);
    DataServer::new(config).serve().await?;
    Ok(())
}
