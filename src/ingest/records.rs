use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::{prelude::*, select, PgConnection};
use uuid::Uuid;

use crate::{
    bot_api::{without_nul, ApiChat, ApiUser, Message},
    models::{Chat, NewChat, NewChatEvent, NewTextMessage, NewUser, TextMessage, UpdateCursor, User},
    schema::{chat_events, chats, text_messages, update_cursor, users},
};

const CURSOR_ROW_ID: i32 = 1;

pub fn load_cursor(conn: &mut PgConnection) -> QueryResult<Option<UpdateCursor>> {
    update_cursor::table
        .find(CURSOR_ROW_ID)
        .first(conn)
        .optional()
}

pub fn advance_cursor(conn: &mut PgConnection, update_id: i64) -> QueryResult<()> {
    diesel::insert_into(update_cursor::table)
        .values((
            update_cursor::id.eq(CURSOR_ROW_ID),
            update_cursor::update_id.eq(update_id),
        ))
        .on_conflict(update_cursor::id)
        .do_update()
        .set(update_cursor::update_id.eq(update_id))
        .execute(conn)?;
    Ok(())
}

/// Inserts the user or refreshes the name and username of a known one.
pub fn upsert_user(conn: &mut PgConnection, user: &ApiUser) -> QueryResult<User> {
    let new_user = NewUser {
        uid: user.id,
        name: user.first_name.as_deref().map(without_nul).unwrap_or_default(),
        username: user.username.as_deref().map(without_nul),
    };

    diesel::insert_into(users::table)
        .values(&new_user)
        .on_conflict(users::uid)
        .do_update()
        .set((
            users::name.eq(&new_user.name),
            users::username.eq(&new_user.username),
        ))
        .get_result(conn)
}

/// Known chats are returned as stored; their fields are never overwritten.
pub fn get_or_create_chat(conn: &mut PgConnection, chat: &ApiChat) -> QueryResult<Chat> {
    let new_chat = NewChat {
        id: chat.id,
        chat_type: chat.chat_type.as_deref().map(without_nul).unwrap_or_default(),
        title: chat.title.as_deref().map(without_nul).unwrap_or_default(),
        username: chat.username.as_deref().map(without_nul).unwrap_or_default(),
        first_name: chat.first_name.as_deref().map(without_nul).unwrap_or_default(),
        last_name: chat.last_name.as_deref().map(without_nul).unwrap_or_default(),
    };

    diesel::insert_into(chats::table)
        .values(&new_chat)
        .on_conflict(chats::id)
        .do_nothing()
        .execute(conn)?;

    chats::table.find(chat.id).first(conn)
}

pub fn message_exists(conn: &mut PgConnection, message_id: i64) -> QueryResult<bool> {
    select(exists(
        text_messages::table.filter(text_messages::message_id.eq(message_id)),
    ))
    .get_result(conn)
}

pub fn save_text_message(
    conn: &mut PgConnection,
    message: &Message,
    message_id: i64,
    sent_at: DateTime<Utc>,
) -> QueryResult<TextMessage> {
    let sender_id = match &message.from {
        Some(from) => Some(upsert_user(conn, from)?.uid),
        None => None,
    };
    let chat = get_or_create_chat(conn, &message.chat)?;
    let reply_id = match &message.reply_to_message {
        Some(reply) => text_messages::table
            .filter(text_messages::message_id.eq(reply.message_id))
            .select(text_messages::id)
            .first::<Uuid>(conn)
            .optional()?,
        None => None,
    };

    let new_message = NewTextMessage {
        id: Uuid::new_v4(),
        message_id,
        sender_id,
        chat_id: Some(chat.id),
        date: sent_at.naive_utc(),
        text: message.stored_text(),
        reply_id,
    };

    diesel::insert_into(text_messages::table)
        .values(&new_message)
        .get_result(conn)
}

/// Appends an audit row unless one already exists for the same user, chat,
/// date and event type. Returns whether a row was written.
pub fn record_chat_event(
    conn: &mut PgConnection,
    user_id: i64,
    chat_id: i64,
    date: NaiveDateTime,
    event_type: &str,
    inviter_id: Option<i64>,
) -> QueryResult<bool> {
    let already_logged: bool = select(exists(
        chat_events::table
            .filter(chat_events::user_id.eq(user_id))
            .filter(chat_events::chat_id.eq(chat_id))
            .filter(chat_events::date.eq(date))
            .filter(chat_events::event_type.eq(event_type)),
    ))
    .get_result(conn)?;

    if already_logged {
        return Ok(false);
    }

    diesel::insert_into(chat_events::table)
        .values(&NewChatEvent {
            id: Uuid::new_v4(),
            date,
            user_id,
            chat_id,
            inviter_id,
            event_type: event_type.to_string(),
        })
        .execute(conn)?;
    Ok(true)
}
