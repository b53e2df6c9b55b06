//! Registry node binary

use clap::{Parser, Subcommand};
use minireg::{common::config::Config, RegistryNode};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minireg-node")]
#[command(about = "minireg replicated service registry node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a registry node
    Serve {
        /// Config file (YAML or TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// HTTP listen port
        #[arg(long)]
        port: Option<u16>,

        /// Address other nodes reach this node at
        #[arg(long)]
        node_addr: Option<String>,

        /// Cluster candidates in priority order (comma-separated)
        #[arg(long, value_delimiter = ',')]
        cluster: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            node_addr,
            cluster,
        } => {
            // File and environment first, CLI flags win
            let mut config = Config::load(config.as_deref())?;
            if let Some(port) = port {
                config.registry.port = port;
            }
            if let Some(node_addr) = node_addr {
                config.registry.node_addr = Some(node_addr);
            }
            if !cluster.is_empty() {
                config.registry.cluster = cluster;
            }
            config.registry.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let node = RegistryNode::new(config.registry);
            tokio::select! {
                res = node.serve() => res?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                }
            }
        }
    }

    Ok(())
}
