//! CLI for registry operations

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use minireg::node::models::InstanceRequest;

#[derive(Parser)]
#[command(name = "minireg")]
#[command(about = "minireg service registry CLI")]
#[command(version)]
struct Cli {
    /// Registry node URL
    #[arg(long, default_value = "http://localhost:8180")]
    registry: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InstanceArgs {
    /// Service name
    #[arg(long)]
    name: String,

    /// Service instance ID
    #[arg(long)]
    id: String,

    /// Instance IP address
    #[arg(long)]
    ip: String,

    /// Instance port
    #[arg(long)]
    port: u32,
}

impl From<InstanceArgs> for InstanceRequest {
    fn from(args: InstanceArgs) -> Self {
        InstanceRequest {
            service_name: args.name,
            service_id: args.id,
            ip_address: args.ip,
            port: args.port,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register an instance
    Register(InstanceArgs),

    /// Remove an instance
    Unregister(InstanceArgs),

    /// Send a heartbeat for an instance
    Heartbeat(InstanceArgs),

    /// Discover instances (all of them when no name is given)
    Discover {
        /// Service name
        #[arg(long)]
        name: Option<String>,
    },

    /// Show node health and role
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let base = cli.registry.trim_end_matches('/');
    let client = reqwest::Client::new();

    let response = match cli.command {
        Commands::Register(args) => {
            client
                .post(format!("{}/api/register", base))
                .json(&InstanceRequest::from(args))
                .send()
                .await
        }
        Commands::Unregister(args) => {
            client
                .post(format!("{}/api/unregister", base))
                .json(&InstanceRequest::from(args))
                .send()
                .await
        }
        Commands::Heartbeat(args) => {
            client
                .post(format!("{}/api/heartbeat", base))
                .json(&InstanceRequest::from(args))
                .send()
                .await
        }
        Commands::Discover { name } => {
            let mut req = client.get(format!("{}/api/discovery", base));
            if let Some(name) = name {
                req = req.query(&[("name", name)]);
            }
            req.send().await
        }
        Commands::Health => client.get(format!("{}/health", base)).send().await,
    }
    .with_context(|| format!("request to {} failed", base))?;

    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("response is not valid JSON")?;

    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        anyhow::bail!("registry answered {}", status);
    }

    Ok(())
}
