//! livedb-server - Live key/value store service
//!
//! Opens (or creates) the LiveDB database, starts the update queue
//! controller and serves the HTTP/SSE API until Ctrl+C or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use livedb_common::config::{database_path, resolve_root_folder, TomlConfig, DEFAULT_PORT};
use livedb_common::db::init_database;
use livedb_server::services::LiveDb;
use livedb_server::{build_router, AppState};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for livedb-server
#[derive(Parser, Debug)]
#[command(name = "livedb-server")]
#[command(about = "Live key/value store service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "LIVEDB_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(short, long)]
    bind_address: Option<String>,

    /// Root folder holding livedb.db
    #[arg(short, long, env = "LIVEDB_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, env = "LIVEDB_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The TOML file is read before tracing starts so its log level can apply
    let toml_config = TomlConfig::load_or_default(args.config.as_deref());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("livedb_server={},tower_http=info", toml_config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting livedb-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let db_path = database_path(&root_folder);
    info!("Database path: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let livedb = LiveDb::open(pool)
        .await
        .context("Failed to load LiveDB configuration")?;
    livedb.start();

    let app = build_router(AppState::new(livedb.clone()));

    let bind_address = args
        .bind_address
        .or(toml_config.bind_address)
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.port.or(toml_config.port).unwrap_or(DEFAULT_PORT);
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind_address, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("livedb-server listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    livedb.shutdown().await;

    if let Err(e) = served {
        error!("Server error: {}", e);
        return Err(e).context("Server error");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
