use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

pub const USER_ROLES: &[&str] = &["", "MANSOOR", "NASER", "NADER"];

pub const MESSAGE_TYPES: &[&str] = &[
    "",
    "QUESTION",
    "ANSWER",
    "SUGGESTION",
    "ADVERTISEMENT",
    "STATEMENT",
    "SELL",
    "TRASH",
];

pub const EVENT_ENTRY: &str = "ENTRY";
pub const EVENT_EXIT: &str = "EXIT";

pub const PRIVATE_CHAT_TYPE: &str = "private";

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = staff)]
pub struct Staff {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = staff)]
pub struct NewStaff {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub staff_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

/// High-water mark of consumed bot API updates. The table holds at most one row.
#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = update_cursor)]
pub struct UpdateCursor {
    pub id: i32,
    pub update_id: i64,
}

/// A bot API account seen in some chat.
#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
#[diesel(primary_key(uid))]
pub struct User {
    pub uid: i64,
    pub name: String,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub mobile: String,
    pub role: String,
}

impl User {
    pub fn display_name(&self) -> String {
        match self.username.as_deref() {
            Some(username) if !username.is_empty() => format!("{}@{}", self.name, username),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub uid: i64,
    pub name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = chats)]
pub struct Chat {
    pub id: i64,
    pub chat_type: String,
    pub title: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

impl Chat {
    pub fn is_private(&self) -> bool {
        self.chat_type == PRIVATE_CHAT_TYPE
    }

    /// Private chats are named after the peer, groups and channels by title.
    pub fn display_title(&self) -> String {
        if !self.is_private() {
            return self.title.clone();
        }
        let full_name = format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string();
        if self.username.is_empty() {
            full_name
        } else {
            format!("{full_name}@{}", self.username)
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chats)]
pub struct NewChat {
    pub id: i64,
    pub chat_type: String,
    pub title: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Queryable, Insertable, Associations)]
#[diesel(table_name = chat_admins)]
#[diesel(belongs_to(Chat))]
#[diesel(belongs_to(User, foreign_key = user_id))]
#[diesel(primary_key(chat_id, user_id))]
pub struct ChatAdmin {
    pub chat_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = memberships)]
#[diesel(belongs_to(Chat))]
#[diesel(belongs_to(User, foreign_key = member_id))]
pub struct Membership {
    pub id: Uuid,
    pub chat_id: i64,
    pub member_id: i64,
    pub exited: bool,
    pub last_membership_date: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = memberships)]
pub struct NewMembership {
    pub id: Uuid,
    pub chat_id: i64,
    pub member_id: i64,
    pub exited: bool,
    pub last_membership_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = text_messages)]
pub struct TextMessage {
    pub id: Uuid,
    pub message_id: i64,
    pub sender_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub date: NaiveDateTime,
    pub text: String,
    pub message_type: String,
    pub reply_id: Option<Uuid>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = text_messages)]
pub struct NewTextMessage {
    pub id: Uuid,
    pub message_id: i64,
    pub sender_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub date: NaiveDateTime,
    pub text: String,
    pub reply_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = generated_answers)]
#[diesel(belongs_to(TextMessage))]
pub struct GeneratedAnswer {
    pub id: Uuid,
    pub text_message_id: Uuid,
    pub human_answer: String,
    pub ai_answer: String,
    pub status: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = generated_answers)]
pub struct NewGeneratedAnswer {
    pub id: Uuid,
    pub text_message_id: Uuid,
    pub human_answer: String,
    pub ai_answer: String,
    pub status: String,
}

/// Historical text imported in bulk from an exported chat log.
#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = archived_text_messages)]
pub struct ArchivedTextMessage {
    pub id: Uuid,
    pub sid: String,
    pub chat_id: String,
    pub text: String,
    pub hashtags: Vec<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = archived_text_messages)]
pub struct NewArchivedTextMessage {
    pub id: Uuid,
    pub sid: String,
    pub chat_id: String,
    pub text: String,
    pub hashtags: Vec<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = chat_events)]
pub struct ChatEvent {
    pub id: Uuid,
    pub date: NaiveDateTime,
    pub user_id: i64,
    pub chat_id: i64,
    pub inviter_id: Option<i64>,
    pub event_type: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_events)]
pub struct NewChatEvent {
    pub id: Uuid,
    pub date: NaiveDateTime,
    pub user_id: i64,
    pub chat_id: i64,
    pub inviter_id: Option<i64>,
    pub event_type: String,
}

#[cfg(test)]
mod tests {
    use super::{Chat, User};

    fn chat(chat_type: &str) -> Chat {
        Chat {
            id: 1,
            chat_type: chat_type.to_string(),
            title: "Readers".to_string(),
            username: "sara".to_string(),
            first_name: "Sara".to_string(),
            last_name: String::new(),
        }
    }

    #[test]
    fn private_chat_title_uses_peer_name() {
        assert_eq!(chat("private").display_title(), "Sara@sara");
    }

    #[test]
    fn group_chat_title_uses_title() {
        assert_eq!(chat("group").display_title(), "Readers");
    }

    #[test]
    fn user_display_name_skips_missing_username() {
        let mut user = User {
            uid: 7,
            name: "Ali".to_string(),
            username: None,
            first_name: String::new(),
            last_name: String::new(),
            mobile: String::new(),
            role: String::new(),
        };
        assert_eq!(user.display_name(), "Ali");
        user.username = Some("ali".to_string());
        assert_eq!(user.display_name(), "Ali@ali");
    }
}
