use chrono::{DateTime, Duration, Utc};
use diesel::{prelude::*, PgConnection};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{records, IngestError, PassContext};
use crate::{
    bot_api::Message,
    models::{NewMembership, EVENT_ENTRY, EVENT_EXIT},
    schema::{memberships, users},
};

pub const WELCOME_WINDOW_MINUTES: i64 = 10;

pub async fn handle_join(
    conn: &mut PgConnection,
    ctx: &PassContext<'_>,
    message: &Message,
    sent_at: DateTime<Utc>,
) -> Result<(), IngestError> {
    let Some(new_members) = message.new_chat_members.as_deref() else {
        return Ok(());
    };
    let chat = records::get_or_create_chat(conn, &message.chat)?;
    let date = sent_at.naive_utc();

    for member in new_members {
        let user = records::upsert_user(conn, member)?;

        diesel::insert_into(memberships::table)
            .values(&NewMembership {
                id: Uuid::new_v4(),
                chat_id: chat.id,
                member_id: user.uid,
                exited: false,
                last_membership_date: Some(date),
            })
            .on_conflict((memberships::chat_id, memberships::member_id))
            .do_update()
            .set((
                memberships::exited.eq(false),
                memberships::last_membership_date.eq(Some(date)),
            ))
            .execute(conn)?;

        let inviter_id = match &message.from {
            Some(from) => users::table
                .find(from.id)
                .select(users::uid)
                .first::<i64>(conn)
                .optional()?,
            None => None,
        };

        let recorded =
            records::record_chat_event(conn, user.uid, chat.id, date, EVENT_ENTRY, inviter_id)?;
        if !recorded {
            debug!(user_id = user.uid, chat_id = chat.id, "entry already recorded");
            continue;
        }

        if !is_recent(sent_at, ctx.now) {
            debug!(user_id = user.uid, chat_id = chat.id, "join too old for a welcome");
            continue;
        }

        let text = render_welcome(
            &ctx.config.welcome_message,
            &user.name,
            user.username.as_deref(),
            &chat.title,
        );
        match ctx.bot.send_message(chat.id, &text, None).await {
            Ok(()) => info!(chat_id = chat.id, user_id = user.uid, "welcome message sent"),
            Err(err) => error!(
                chat_id = chat.id,
                user_id = user.uid,
                error = %err,
                "welcome message could not be sent"
            ),
        }
    }

    Ok(())
}

pub fn handle_departure(
    conn: &mut PgConnection,
    message: &Message,
    sent_at: DateTime<Utc>,
) -> Result<(), IngestError> {
    let Some(left) = &message.left_chat_member else {
        return Ok(());
    };
    let user = records::upsert_user(conn, left)?;
    let chat = records::get_or_create_chat(conn, &message.chat)?;

    diesel::insert_into(memberships::table)
        .values(&NewMembership {
            id: Uuid::new_v4(),
            chat_id: chat.id,
            member_id: user.uid,
            exited: true,
            last_membership_date: None,
        })
        .on_conflict((memberships::chat_id, memberships::member_id))
        .do_update()
        .set(memberships::exited.eq(true))
        .execute(conn)?;

    let date = sent_at.naive_utc();
    if records::record_chat_event(conn, user.uid, chat.id, date, EVENT_EXIT, None)? {
        info!(user_id = user.uid, chat_id = chat.id, "member left chat");
    }
    Ok(())
}

fn is_recent(sent_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - sent_at < Duration::minutes(WELCOME_WINDOW_MINUTES)
}

/// Fills `{user_name}`, `{user_username}`, `{group_name}` and `{new_line}`.
/// `{{` and `}}` are literal braces; unknown placeholders are kept verbatim.
pub fn render_welcome(
    template: &str,
    member_name: &str,
    member_username: Option<&str>,
    group_name: &str,
) -> String {
    let username = match member_username {
        Some(username) if username.chars().count() >= 2 => format!("@{username}"),
        _ => String::new(),
    };

    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
        rendered.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            rendered.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('{') {
            if let Some(end) = tail.find('}') {
                let value = match &tail[1..end] {
                    "user_name" => Some(member_name),
                    "user_username" => Some(username.as_str()),
                    "group_name" => Some(group_name),
                    "new_line" => Some("\n"),
                    _ => None,
                };
                if let Some(value) = value {
                    rendered.push_str(value);
                    rest = &tail[end + 1..];
                    continue;
                }
            }
        }

        rendered.push_str(&tail[..1]);
        rest = &tail[1..];
    }
    rendered.push_str(rest);
    rendered
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{is_recent, render_welcome};

    #[test]
    fn renders_all_placeholders() {
        let rendered = render_welcome(
            "Hi {user_name} {user_username}!{new_line}Welcome to {group_name}.",
            "Sara",
            Some("sara"),
            "Readers",
        );
        assert_eq!(rendered, "Hi Sara @sara!\nWelcome to Readers.");
    }

    #[test]
    fn short_or_missing_username_renders_empty() {
        assert_eq!(render_welcome("[{user_username}]", "A", Some("a"), "G"), "[]");
        assert_eq!(render_welcome("[{user_username}]", "A", None, "G"), "[]");
    }

    #[test]
    fn escaped_and_unknown_braces_survive() {
        assert_eq!(
            render_welcome("{{literal}} {unknown} {user_name", "Sara", None, "G"),
            "{literal} {unknown} {user_name"
        );
    }

    #[test]
    fn welcome_window_is_ten_minutes() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert!(is_recent(now - Duration::minutes(9), now));
        assert!(!is_recent(now - Duration::minutes(10), now));
        assert!(!is_recent(now - Duration::hours(2), now));
    }
}
