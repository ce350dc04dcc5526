use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: Option<bool>,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub edited_message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

impl Update {
    /// The message-shaped record carried by this update, whichever kind it is.
    pub fn message(&self) -> Option<&Message> {
        self.message
            .as_ref()
            .or(self.edited_message.as_ref())
            .or_else(|| {
                self.callback_query
                    .as_ref()
                    .and_then(|query| query.message.as_ref())
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: Option<String>,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Option<i64>,
    pub date: i64,
    pub chat: ApiChat,
    pub from: Option<ApiUser>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub reply_to_message: Option<MessageRef>,
    pub new_chat_members: Option<Vec<ApiUser>>,
    pub left_chat_member: Option<ApiUser>,
    pub forward_from: Option<ApiUser>,
    pub forward_from_chat: Option<ApiChat>,
    pub forward_from_message_id: Option<i64>,
}

impl Message {
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.date, 0)
    }

    /// Hour of day the message was sent, seen from `offset`.
    pub fn local_hour(&self, offset: FixedOffset) -> Option<u32> {
        self.sent_at()
            .map(|sent_at| sent_at.with_timezone(&offset).hour())
    }

    pub fn is_join(&self) -> bool {
        self.new_chat_members.is_some()
    }

    pub fn is_departure(&self) -> bool {
        self.left_chat_member.is_some()
    }

    pub fn is_forwarded(&self) -> bool {
        self.forward_from_message_id.is_some()
            || self.forward_from.is_some()
            || self.forward_from_chat.is_some()
    }

    /// Stored text: the caption wins over the body, NUL characters are dropped.
    pub fn stored_text(&self) -> String {
        self.caption
            .as_deref()
            .or(self.text.as_deref())
            .map(without_nul)
            .unwrap_or_default()
    }
}

/// Postgres text columns reject NUL, which the bot API passes through as-is.
pub fn without_nul(raw: &str) -> String {
    raw.replace('\0', "")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRef {
    pub message_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUser {
    pub id: i64,
    pub first_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: Option<String>,
    pub title: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMember {
    pub user: ApiUser,
    pub status: Option<String>,
}
