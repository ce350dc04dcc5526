use std::collections::HashSet;

use diesel::{prelude::*, PgConnection};
use tracing::{debug, error, info, warn};

use super::{records, IngestError, PassContext};
use crate::{
    bot_api::{ApiChat, BotApi, BotApiError, ChatMember, Message},
    models::ChatAdmin,
    schema::chat_admins,
};

pub const MAX_DELETE_ATTEMPTS: u32 = 3;
pub const MAX_ADMIN_FETCH_ATTEMPTS: u32 = 3;

/// Deletes a forwarded message posted outside the legal hours unless its
/// sender administers the chat.
pub async fn purge_if_out_of_hours(
    conn: &mut PgConnection,
    ctx: &PassContext<'_>,
    message: &Message,
) -> Result<(), IngestError> {
    let chat_id = message.chat.id;
    let Some(hour) = message.local_hour(ctx.local_offset) else {
        warn!(chat_id, date = message.date, "forwarded message has an invalid date");
        return Ok(());
    };
    if ctx.config.legal_hours.contains(hour) {
        return Ok(());
    }

    let admins = match fetch_admins(ctx.bot, chat_id).await {
        Ok(admins) => admins,
        Err(BotApiError::PermissionDenied) => {
            error!(
                chat_id,
                "forwarded message purge cancelled: bot is not an admin of the chat"
            );
            return Ok(());
        }
        Err(err) => {
            error!(chat_id, error = %err, "forwarded message purge cancelled: admin list unavailable");
            return Ok(());
        }
    };
    let admin_ids = refresh_admins(conn, &message.chat, &admins)?;

    if let Some(sender) = &message.from {
        if admin_ids.contains(&sender.id) {
            debug!(chat_id, sender_id = sender.id, "forwarded by an admin; keeping");
            return Ok(());
        }
    }

    let Some(message_id) = message.message_id else {
        warn!(chat_id, "forwarded message carries no id; cannot delete");
        return Ok(());
    };
    delete_with_retries(ctx.bot, chat_id, message_id).await;
    Ok(())
}

async fn fetch_admins(bot: &dyn BotApi, chat_id: i64) -> Result<Vec<ChatMember>, BotApiError> {
    let mut attempt = 1;
    loop {
        match bot.get_chat_administrators(chat_id).await {
            Ok(admins) => return Ok(admins),
            Err(err) if err.is_transient() && attempt < MAX_ADMIN_FETCH_ATTEMPTS => {
                warn!(chat_id, attempt, error = %err, "fetching chat admins failed; retrying");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Replaces the stored admin set of the chat with `admins`.
fn refresh_admins(
    conn: &mut PgConnection,
    chat: &ApiChat,
    admins: &[ChatMember],
) -> Result<HashSet<i64>, IngestError> {
    let chat = records::get_or_create_chat(conn, chat)?;

    let mut rows = Vec::with_capacity(admins.len());
    for admin in admins {
        let user = records::upsert_user(conn, &admin.user)?;
        rows.push(ChatAdmin {
            chat_id: chat.id,
            user_id: user.uid,
        });
    }

    diesel::delete(chat_admins::table.filter(chat_admins::chat_id.eq(chat.id))).execute(conn)?;
    if !rows.is_empty() {
        diesel::insert_into(chat_admins::table)
            .values(&rows)
            .on_conflict_do_nothing()
            .execute(conn)?;
    }

    Ok(rows.into_iter().map(|row| row.user_id).collect())
}

async fn delete_with_retries(bot: &dyn BotApi, chat_id: i64, message_id: i64) -> bool {
    for attempt in 1..=MAX_DELETE_ATTEMPTS {
        match bot.delete_message(chat_id, message_id).await {
            Ok(()) => {
                info!(chat_id, message_id, "forwarded message deleted");
                return true;
            }
            Err(err) => {
                warn!(chat_id, message_id, attempt, error = %err, "delete attempt failed");
            }
        }
    }
    error!(
        chat_id,
        message_id,
        attempts = MAX_DELETE_ATTEMPTS,
        "forwarded message could not be deleted"
    );
    false
}
