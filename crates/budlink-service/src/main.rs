use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use budlink_service::{AppState, Config, app};
use budlink_store::Store;

/// Bluetooth reconnect daemon.
#[derive(Parser, Debug)]
#[command(name = "budlinkd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to ~/.config/budlink/service.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address, overriding the configuration.
    #[arg(short, long)]
    bind: Option<String>,

    /// Reconnect table database, overriding the configuration.
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Do not reconnect remembered devices at startup.
    #[arg(long)]
    no_reconnect_on_start: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("budlink_service=info".parse()?)
                .add_directive("budlink_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!("Ignoring unreadable default config: {}", e);
            Config::default()
        }),
    };

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(database) = args.database {
        config.storage.path = database;
    }
    if args.no_reconnect_on_start {
        config.connect.reconnect_on_start = false;
    }

    config.validate()?;

    let store = Store::open(&config.storage.path)?;
    let state = AppState::new(store, config.clone())?;

    if config.connect.reconnect_on_start {
        let started = state
            .handle
            .reconnect_paired(config.policy.to_policy())
            .await?;
        info!("Started {} reconnect campaigns", started);
    }

    let addr: SocketAddr = tokio::net::lookup_host(&config.server.bind)
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("bind address {} did not resolve", config.server.bind))?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state.clone(), &config))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.handle.shutdown().await;
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
