use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use jam_midi::NullMidiTransport;
use jam_session::{SessionConfig, SessionEngine};

#[derive(Parser, Debug)]
#[command(name = "jam-session", about = "MidiJam session daemon")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/session.toml")]
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config: SessionConfig = if args.config.exists() {
        let config_str = tokio::fs::read_to_string(&args.config).await?;
        toml::from_str(&config_str)?
    } else {
        info!(path = %args.config.display(), "no config file, using defaults");
        SessionConfig::default()
    };
    config.validate()?;

    let mut engine = SessionEngine::new(config, Box::new(NullMidiTransport::new()));
    engine.start().await?;

    // Surface roster changes until Ctrl-C.
    let mut last_seen: Option<Vec<String>> = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_secs(5)) => {
                if let Some(roster) = engine.roster() {
                    let names: Vec<String> = roster
                        .clients
                        .iter()
                        .map(|c| c.nickname.clone())
                        .collect();
                    if last_seen.as_ref() != Some(&names) {
                        info!(participants = ?names, "session roster");
                        last_seen = Some(names);
                    }
                }
            }
        }
    }

    info!("leaving session");
    engine.stop().await;
    Ok(())
}
