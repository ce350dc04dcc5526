use std::net::SocketAddr;

use tokio::net::TcpListener;
use tower::make::Shared;

use botreader::{config::AppConfig, db, logging, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = AppConfig::from_env()?;
    let _log_guard = logging::init_tracing(&config)?;

    tracing::info!(
        component = "server",
        environment = ?config.environment,
        debug = config.debug,
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        legal_hours = %config.legal_hours,
        "loaded botreader configuration"
    );
    let listen_addr: SocketAddr =
        format!("{}:{}", config.server_host, config.server_port).parse()?;

    let state = AppState::from_config(config)?;
    let applied = db::run_migrations(&state.pool)?;
    if applied > 0 {
        tracing::info!(applied, "applied pending migrations");
    }

    let router = routes::create_router(state);
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, Shared::new(router)).await?;
    Ok(())
}
