use std::time::Duration;

use tokio::signal;

use botreader::{config::AppConfig, db, logging, state::AppState, Poller};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = AppConfig::from_env()?;
    let _log_guard = logging::init_tracing(&config)?;

    tracing::info!(
        component = "poller",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        interval_secs = config.poll_interval_seconds,
        legal_hours = %config.legal_hours,
        "loaded botreader configuration"
    );
    let interval = Duration::from_secs(config.poll_interval_seconds.max(1));
    let config = AppConfig {
        database_max_pool_size: 1,
        ..config
    };

    let state = AppState::from_config(config)?;
    db::run_migrations(&state.pool)?;
    let poller = Poller::new(state, interval);

    tokio::select! {
        _ = poller.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("poller received shutdown signal");
        }
    }

    Ok(())
}
