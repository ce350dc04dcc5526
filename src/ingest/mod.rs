use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::PgConnection;
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    bot_api::{BotApi, BotApiError, Update},
    config::AppConfig,
    state::AppState,
};

pub mod forwarded;
pub mod members;
pub mod records;

pub const MAX_FETCH_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("bot api unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: BotApiError,
    },
    #[error("bot api call failed: {0}")]
    Api(#[source] BotApiError),
    #[error("bot api returned a null update list")]
    BadResult,
    #[error("update {0} carries no message")]
    UnreadableUpdate(i64),
    #[error("update {0} has neither a message id nor a membership change")]
    UnidentifiedMessage(i64),
    #[error("update {update_id} has an out of range date {date}")]
    InvalidDate { update_id: i64, date: i64 },
    #[error("poll pass aborted: {0}")]
    Aborted(String),
}

/// What one poll pass consumed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub batches: usize,
    pub updates_processed: usize,
    pub messages_stored: usize,
}

/// Everything a poll pass shares with the per-update handlers.
pub struct PassContext<'a> {
    pub bot: &'a dyn BotApi,
    pub config: &'a AppConfig,
    pub now: DateTime<Utc>,
    pub local_offset: FixedOffset,
}

impl<'a> PassContext<'a> {
    pub fn new(bot: &'a dyn BotApi, config: &'a AppConfig) -> Self {
        let local_offset = config.local_offset().unwrap_or_else(|| {
            warn!(
                minutes = config.local_utc_offset_minutes,
                "local utc offset out of range; using utc"
            );
            Utc.fix()
        });
        Self {
            bot,
            config,
            now: Utc::now(),
            local_offset,
        }
    }
}

/// Runs one complete poll pass inside a single database transaction.
///
/// The pass runs on its own task so that a caller going away mid-pass cannot
/// leave a half-open transaction on a pooled connection.
pub async fn sync_updates(state: AppState) -> Result<SyncReport, IngestError> {
    tokio::spawn(run_pass(state))
        .await
        .map_err(|err| IngestError::Aborted(err.to_string()))?
}

async fn run_pass(state: AppState) -> Result<SyncReport, IngestError> {
    let mut conn = state
        .pool
        .get()
        .map_err(|err| IngestError::Pool(err.to_string()))?;
    let conn: &mut PgConnection = &mut conn;
    let ctx = PassContext::new(state.bot.as_ref(), state.config.as_ref());

    AnsiTransactionManager::begin_transaction(conn)?;
    match consume_updates(conn, &ctx).await {
        Ok(report) => {
            AnsiTransactionManager::commit_transaction(conn)?;
            Ok(report)
        }
        Err(err) => {
            if let Err(rollback_err) = AnsiTransactionManager::rollback_transaction(conn) {
                warn!(error = %rollback_err, "rolling back poll pass failed");
            }
            Err(err)
        }
    }
}

async fn consume_updates(
    conn: &mut PgConnection,
    ctx: &PassContext<'_>,
) -> Result<SyncReport, IngestError> {
    let mut report = SyncReport::default();

    loop {
        let offset = records::load_cursor(conn)?.map(|cursor| cursor.update_id);
        let updates = fetch_updates(ctx.bot, offset).await?;

        // The platform echoes the update at `offset` back; only later ones are new.
        let fresh: Vec<&Update> = updates
            .iter()
            .filter(|update| offset.map_or(true, |offset| update.update_id > offset))
            .collect();
        let Some(last) = fresh.last() else {
            debug!(?offset, "no new updates");
            break;
        };

        records::advance_cursor(conn, last.update_id)?;
        report.batches += 1;

        for update in fresh {
            if process_update(conn, ctx, update).await? {
                report.messages_stored += 1;
            }
            report.updates_processed += 1;
        }
    }

    info!(
        batches = report.batches,
        updates = report.updates_processed,
        stored = report.messages_stored,
        "poll pass finished"
    );
    Ok(report)
}

async fn fetch_updates(bot: &dyn BotApi, offset: Option<i64>) -> Result<Vec<Update>, IngestError> {
    let mut attempt = 1;
    loop {
        match bot.get_updates(offset).await {
            Ok(Some(updates)) => return Ok(updates),
            Ok(None) => return Err(IngestError::BadResult),
            Err(err) if err.is_transient() => {
                if attempt > MAX_FETCH_RETRIES {
                    return Err(IngestError::Unavailable {
                        attempts: attempt,
                        source: err,
                    });
                }
                warn!(?offset, attempt, error = %err, "fetching updates failed; retrying");
                attempt += 1;
            }
            Err(err) => return Err(IngestError::Api(err)),
        }
    }
}

/// Persists one update and runs the moderation routines it calls for.
/// Returns whether a new text message row was written.
async fn process_update(
    conn: &mut PgConnection,
    ctx: &PassContext<'_>,
    update: &Update,
) -> Result<bool, IngestError> {
    let message = update
        .message()
        .ok_or(IngestError::UnreadableUpdate(update.update_id))?;
    let sent_at = message.sent_at().ok_or(IngestError::InvalidDate {
        update_id: update.update_id,
        date: message.date,
    })?;

    let mut stored = false;
    match message.message_id {
        Some(message_id) => {
            if records::message_exists(conn, message_id)? {
                if message_id != 0 {
                    debug!(update_id = update.update_id, message_id, "message already stored");
                    return Ok(false);
                }
            } else {
                records::save_text_message(conn, message, message_id, sent_at)?;
                stored = true;
            }
        }
        None if message.is_join() || message.is_departure() => {}
        None => return Err(IngestError::UnidentifiedMessage(update.update_id)),
    }

    if message.is_join() {
        members::handle_join(conn, ctx, message, sent_at).await?;
    }
    if message.is_departure() {
        members::handle_departure(conn, message, sent_at)?;
    }
    if message.is_forwarded() {
        forwarded::purge_if_out_of_hours(conn, ctx, message).await?;
    }

    Ok(stored)
}

/// Runs poll passes back to back, pausing `interval` between them.
pub struct Poller {
    state: AppState,
    interval: Duration,
}

impl Poller {
    pub fn new(state: AppState, interval: Duration) -> Self {
        Self { state, interval }
    }

    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "poller started");
        loop {
            self.tick().await;
            sleep(self.interval).await;
        }
    }

    pub async fn tick(&self) -> Option<SyncReport> {
        match sync_updates(self.state.clone()).await {
            Ok(report) => Some(report),
            Err(err) => {
                error!(error = %err, "poll pass failed; batch rolled back");
                None
            }
        }
    }
}
