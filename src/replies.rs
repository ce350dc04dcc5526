use diesel::{pg::PgConnection, prelude::*};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    bot_api::BotApi,
    models::{GeneratedAnswer, TextMessage},
    schema::{generated_answers, text_messages},
};

pub const STATUS_DRAFT: &str = "DRAFT";
pub const STATUS_SENDING: &str = "SENDING";
pub const STATUS_SENT: &str = "SENT";

pub const ANSWER_STATUSES: &[&str] = &[STATUS_DRAFT, STATUS_SENDING, STATUS_SENT];

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("message {0} is not attached to a chat")]
    MissingChat(Uuid),
}

pub type ReplyResult<T> = Result<T, ReplyError>;

/// Checks a status change requested from the console.
pub fn validate_transition(current: &str, requested: &str) -> Result<(), String> {
    if !ANSWER_STATUSES.contains(&requested) {
        return Err(format!("unknown answer status '{requested}'"));
    }
    if current == STATUS_SENT {
        return Err("answer was already sent and can no longer change".into());
    }
    if requested == STATUS_SENT {
        return Err("an answer becomes SENT only after it is delivered".into());
    }
    Ok(())
}

/// Delivers a SENDING answer as a reply to its message. The answer becomes
/// SENT only when the platform accepts the message; on failure it stays
/// SENDING until someone triggers it again. Returns the resulting status.
pub async fn dispatch_answer(
    conn: &mut PgConnection,
    bot: &dyn BotApi,
    answer_id: Uuid,
) -> ReplyResult<String> {
    let answer: GeneratedAnswer = generated_answers::table.find(answer_id).first(conn)?;
    if answer.status != STATUS_SENDING {
        return Ok(answer.status);
    }

    let message: TextMessage = text_messages::table
        .find(answer.text_message_id)
        .first(conn)?;
    let chat_id = message
        .chat_id
        .ok_or(ReplyError::MissingChat(message.id))?;

    match bot
        .send_message(chat_id, &answer.human_answer, Some(message.message_id))
        .await
    {
        Ok(()) => {
            diesel::update(generated_answers::table.find(answer.id))
                .set(generated_answers::status.eq(STATUS_SENT))
                .execute(conn)?;
            info!(
                answer_id = %answer.id,
                message_id = message.message_id,
                "answer message with id [{}] sent successfully",
                message.message_id
            );
            Ok(STATUS_SENT.to_string())
        }
        Err(err) => {
            warn!(
                answer_id = %answer.id,
                message_id = message.message_id,
                error = %err,
                "answer could not be sent; left in SENDING"
            );
            Ok(answer.status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_transition, STATUS_DRAFT, STATUS_SENDING, STATUS_SENT};

    #[test]
    fn draft_and_sending_swap_freely() {
        assert!(validate_transition(STATUS_DRAFT, STATUS_SENDING).is_ok());
        assert!(validate_transition(STATUS_SENDING, STATUS_DRAFT).is_ok());
        assert!(validate_transition(STATUS_DRAFT, STATUS_DRAFT).is_ok());
    }

    #[test]
    fn sent_is_never_requested_by_hand() {
        assert!(validate_transition(STATUS_SENDING, STATUS_SENT).is_err());
        assert!(validate_transition(STATUS_DRAFT, STATUS_SENT).is_err());
    }

    #[test]
    fn sent_answers_are_frozen() {
        assert!(validate_transition(STATUS_SENT, STATUS_DRAFT).is_err());
        assert!(validate_transition(STATUS_SENT, STATUS_SENDING).is_err());
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(validate_transition(STATUS_DRAFT, "ARCHIVED").is_err());
    }
}
