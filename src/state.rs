use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    bot_api::{BotApi, HttpBotApi},
    config::AppConfig,
    db::{self, PgPool},
    error::{AppError, AppResult},
};

pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub bot: Arc<dyn BotApi>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, bot: Arc<dyn BotApi>, jwt: JwtService) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            bot,
            jwt,
        }
    }

    /// Pool, live bot API client and token service, all from `config`.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        let bot: Arc<dyn BotApi> = Arc::new(HttpBotApi::new(config.bot_api_url()?)?);
        let jwt = JwtService::from_config(&config)?;
        Ok(Self::new(pool, config, bot, jwt))
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
