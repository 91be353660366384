//! towercg-server: Main Entry Point

use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use towercg_core::config::load_environment;
use towercg_core::ServerConfig;
use towercg_plugins::builtin::CounterPlugin;
use towercg_web::Server;

#[derive(Parser, Debug)]
#[command(name = "towercg-server", version, about = "Plugin-hosting state sync server")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and TOWERCG_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory storage and cache paths are resolved against
    #[arg(long, default_value = ".")]
    app_root: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = load_environment();
    let args = Args::parse();

    let mut config = ServerConfig::load(args.config.as_deref(), &args.app_root)?;
    if let Some(port) = args.port {
        config.http.port = port;
    }

    // Initialize logging with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer().compact())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    if let Some(path) = env_file {
        info!("Loaded environment from {}", path);
    }
    info!("towercg-server {} starting", env!("CARGO_PKG_VERSION"));

    let running = Server::new(config)
        .register(CounterPlugin::new(), json!({}))?
        .start()
        .await?;

    running.run(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
