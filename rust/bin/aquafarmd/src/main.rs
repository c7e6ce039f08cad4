//! `aquafarmd`: the pond stock ledger server.
//!
//! Usage:
//!   aquafarmd -c <context-name-or-path> [--listen <addr>]
//!
//! The context name resolves to `/etc/aquafarm/<name>.toml`.
//! If a path with `/` or `.` is given, it's used directly.

mod config;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use aquafarm_core::Module;
use tracing::{info, warn};

use config::ServerConfig;

/// Pond stock ledger server.
#[derive(Parser, Debug)]
#[command(name = "aquafarmd", about = "Pond stock ledger server")]
struct Cli {
    /// Context name or path to config file.
    #[arg(short = 'c', long = "config", required = true)]
    config: String,

    /// Listen address.
    #[arg(long = "listen", default_value = "0.0.0.0:8080")]
    listen: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config_path = ServerConfig::resolve_path(&cli.config);
    info!("Loading configuration from {}", config_path.display());
    let server_config = ServerConfig::load(&config_path)?;
    server_config.verify()?;

    let core_config = aquafarm_core::ServiceConfig {
        data_dir: (!server_config.storage.data_dir.is_empty())
            .then(|| PathBuf::from(&server_config.storage.data_dir)),
        sqlite_path: server_config.storage.sqlite_path.as_ref().map(PathBuf::from),
        listen: cli.listen.clone(),
    };
    let sqlite_path = core_config.prepare_storage()?;
    let sql: Arc<dyn aquafarm_sql::SQLStore> = Arc::new(
        aquafarm_sql::SqliteStore::open(&sqlite_path)
            .map_err(|e| anyhow::anyhow!("failed to open SQL store: {}", e))?,
    );
    info!("SQLite store at {}", sqlite_path.display());

    let authenticator: Arc<dyn aquafarm_core::Authenticator> =
        if server_config.auth.tokens.is_empty() {
            warn!("No [auth.tokens] configured; all requests are allowed");
            Arc::new(aquafarm_core::AllowAll)
        } else {
            info!("{} API tokens loaded", server_config.auth.tokens.len());
            Arc::new(aquafarm_core::TokenAuthenticator::new(
                server_config.auth.tokens.clone(),
            ))
        };

    let stock_module = stock::StockModule::new(
        Arc::clone(&sql),
        server_config.ledger.clone(),
        authenticator,
    )?;
    info!(
        "Stock module initialized (lock timeout {} ms, auto-close {}, permissions: {})",
        server_config.ledger.lock_timeout_ms,
        server_config.ledger.auto_close_on_depletion,
        stock_module.permissions().join(", ")
    );

    let app = routes::build_router(vec![(
        stock_module.name().to_string(),
        stock_module.routes(),
    )]);

    let listener = tokio::net::TcpListener::bind(&core_config.listen).await?;
    info!("aquafarmd listening on {}", core_config.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("aquafarmd stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
