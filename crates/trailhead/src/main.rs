//! `trailhead-server`: runs a Trailhead server until interrupted.

use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use trailhead::{LoggingSettings, Server, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "trailhead-server", version, about = "P3D-style multiplayer game server")]
struct Cli {
    /// Configuration file. Created with defaults if missing.
    #[arg(short, long, default_value = "trailhead.toml")]
    config: PathBuf,

    /// Overrides `server.bind`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Overrides `admission.max_players`.
    #[arg(long)]
    max_players: Option<usize>,

    /// Overrides `logging.level` (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load_or_create(&cli.config).await?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(max_players) = cli.max_players {
        config.admission.max_players = max_players;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json_logs;
    config.validate()?;

    setup_logging(&config.logging);

    let server = Server::new(config);
    let addr = server.start().await?;
    info!(%addr, "ready for players");

    shutdown_signal().await?;
    info!("shutting down");
    if let Err(e) = server.stop().await {
        error!(error = %e, "shutdown did not complete cleanly");
        return Err(e.into());
    }
    Ok(())
}

fn setup_logging(config: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        registry
            .with(fmt::layer().json().with_thread_names(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_names(true))
            .init();
    }
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}
