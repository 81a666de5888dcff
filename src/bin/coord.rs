//! Coordinator binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tabletkv::coordinator::recovery::PartitionedRecovery;
use tabletkv::transport::TcpTransport;
use tabletkv::{Coordinator, CoordinatorConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tabletkv-coord")]
#[command(about = "tabletkv cluster coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator
    Serve {
        /// Bind address for the RPC listener
        #[arg(long, default_value = "0.0.0.0:7070")]
        bind: String,

        /// Config file (CLI arguments take priority)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Membership push attempts before a recipient is hinted down
        #[arg(long, default_value = "3")]
        update_retries: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            config,
            update_retries,
        } => {
            let mut config = match config {
                Some(path) => CoordinatorConfig::from_file(path)?,
                None => CoordinatorConfig::default(),
            };
            config.bind_addr = bind.parse()?;
            config.update_retry_limit = update_retries;
            config.validate()?;

            let transport = Arc::new(TcpTransport::new(config.request_timeout()));
            let recovery = Arc::new(PartitionedRecovery::new(transport.clone()));
            let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;

            tracing::info!("tabletkv coordinator {}", tabletkv::VERSION);
            let coordinator = Coordinator::new(config, transport, recovery, None);
            coordinator.serve(listener).await?;
        }
    }

    Ok(())
}
