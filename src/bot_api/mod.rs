use async_trait::async_trait;
use thiserror::Error;

mod client;
pub mod types;

pub use client::HttpBotApi;
pub use types::{without_nul, ApiChat, ApiResponse, ApiUser, ChatMember, Message, Update};

#[derive(Debug, Error)]
pub enum BotApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response is not valid json: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("response payload has an unexpected shape: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("call rejected: {0}")]
    Rejected(String),
    #[error("bot has no admin permission in chat")]
    PermissionDenied,
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

impl BotApiError {
    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BotApiError::Transport(_)
                | BotApiError::Status { .. }
                | BotApiError::Decode(_)
                | BotApiError::Rejected(_)
        )
    }
}

pub type BotApiResult<T> = Result<T, BotApiError>;

/// Outbound calls to the messaging platform's bot API.
#[async_trait]
pub trait BotApi: Send + Sync + 'static {
    /// Updates starting at `offset` (inclusive). `Ok(None)` when the platform
    /// answered with a null result.
    async fn get_updates(&self, offset: Option<i64>) -> BotApiResult<Option<Vec<Update>>>;

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> BotApiResult<()>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> BotApiResult<()>;

    async fn get_chat_administrators(&self, chat_id: i64) -> BotApiResult<Vec<ChatMember>>;
}
