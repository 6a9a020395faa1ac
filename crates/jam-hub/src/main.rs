use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use jam_hub::config::HubConfig;
use jam_hub::server::HubServer;

#[derive(Parser, Debug)]
#[command(name = "jam-hub", about = "MidiJam relay hub")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/hub.toml")]
    config: PathBuf,

    /// Override the UDP port from the config file
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = if args.config.exists() {
        let config_str = tokio::fs::read_to_string(&args.config).await?;
        toml::from_str(&config_str)?
    } else {
        info!(path = %args.config.display(), "no config file, using defaults");
        HubConfig::default()
    };
    if let Some(port) = args.port {
        config.network.port = port;
    }

    let server = Arc::new(HubServer::bind(config)?);

    let serve_handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                error!(error = %e, "hub stopped");
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    serve_handle.abort();

    Ok(())
}
