//! Command-line client for minidfs

use clap::{Parser, Subcommand};
use minidfs::{ClientConfig, DfsClient};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "minidfs")]
#[command(about = "minidfs distributed file system client")]
#[command(version)]
struct Cli {
    /// Coordinator URL
    #[arg(long, default_value = "http://127.0.0.1:21170")]
    coordinator: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory
    Ls { path: String },

    /// Create a directory
    Mkdir {
        /// Create missing parents too
        #[arg(short = 'p', long)]
        parents: bool,

        path: String,
    },

    /// Remove files
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Remove directory trees
    Rmdir {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Create an empty file
    Touch { path: String },

    /// Print a file
    Cat { path: String },

    /// Upload a local file into a directory in the namespace
    CopyFromLocal { localsrc: PathBuf, dst: String },

    /// Download a file to a local path
    CopyToLocal { src: String, localdst: PathBuf },

    /// Compute mean and variance of an integer-per-line file
    CalMeanVar { path: String },

    /// Wipe the namespace and fence out stale data servers
    Format,
}

async fn run(cli: Cli) -> minidfs::Result<()> {
    let config = ClientConfig {
        coordinator: cli.coordinator.clone(),
        ..Default::default()
    };
    let mut client = DfsClient::connect(config).await?;

    match cli.command {
        Commands::Ls { path } => {
            let entries = client.ls(&path).await?;
            println!("{}", entries.join("\t"));
        }
        Commands::Mkdir { parents, path } => {
            client.mkdir(&path, parents).await?;
        }
        Commands::Rm { paths } => {
            client.rm(&paths).await?;
        }
        Commands::Rmdir { paths } => {
            client.rmdir(&paths).await?;
        }
        Commands::Touch { path } => {
            client.touch(&path).await?;
        }
        Commands::Cat { path } => {
            let content = client.cat(&path).await?;
            std::io::stdout().write_all(&content)?;
        }
        Commands::CopyFromLocal { localsrc, dst } => {
            client.copy_from_local(&localsrc, &dst).await?;
        }
        Commands::CopyToLocal { src, localdst } => {
            client.copy_to_local(&src, &localdst).await?;
        }
        Commands::CalMeanVar { path } => {
            let result = client.cal_mean_var(&path).await?;
            println!("{}", result);
        }
        Commands::Format => {
            client.format().await?;
            println!("format succeeded");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("minidfs: {}", e);
            ExitCode::FAILURE
        }
    }
}
