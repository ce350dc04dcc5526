use axum::extract::{Json, Path, State};
use chrono::NaiveDateTime;
use diesel::{prelude::*, result::DatabaseErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{GeneratedAnswer, NewGeneratedAnswer, TextMessage};
use crate::replies::{dispatch_answer, validate_transition, STATUS_DRAFT, STATUS_SENDING, STATUS_SENT};
use crate::schema::{generated_answers, text_messages};
use crate::state::AppState;
use crate::utils::json::field;

#[derive(Deserialize)]
pub struct CreateAnswerRequest {
    pub human_answer: String,
    #[serde(default)]
    pub ai_answer: String,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = generated_answers)]
struct UpdateAnswerChangeset {
    human_answer: Option<String>,
    ai_answer: Option<String>,
    status: Option<String>,
}

#[derive(Serialize)]
pub struct AnswerResponse {
    pub id: Uuid,
    pub text_message_id: Uuid,
    pub human_answer: String,
    pub ai_answer: String,
    pub status: String,
    pub created_at: NaiveDateTime,
}

impl From<GeneratedAnswer> for AnswerResponse {
    fn from(answer: GeneratedAnswer) -> Self {
        Self {
            id: answer.id,
            text_message_id: answer.text_message_id,
            human_answer: answer.human_answer,
            ai_answer: answer.ai_answer,
            status: answer.status,
            created_at: answer.created_at,
        }
    }
}

pub async fn create_answer(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(payload): Json<CreateAnswerRequest>,
) -> AppResult<Json<AnswerResponse>> {
    let mut conn = state.db()?;
    let message: TextMessage = text_messages::table.find(message_id).first(&mut conn)?;

    let new_answer = NewGeneratedAnswer {
        id: Uuid::new_v4(),
        text_message_id: message.id,
        human_answer: payload.human_answer,
        ai_answer: payload.ai_answer,
        status: STATUS_DRAFT.to_string(),
    };

    let answer: GeneratedAnswer = match diesel::insert_into(generated_answers::table)
        .values(&new_answer)
        .get_result(&mut conn)
    {
        Ok(answer) => answer,
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::conflict("message already has an answer"));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    Ok(Json(answer.into()))
}

pub async fn update_answer(
    State(state): State<AppState>,
    Path(answer_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<AnswerResponse>> {
    let mut conn = state.db()?;
    let existing: GeneratedAnswer = generated_answers::table.find(answer_id).first(&mut conn)?;
    if existing.status == STATUS_SENT {
        return Err(AppError::conflict("answer was already sent"));
    }

    let changeset = UpdateAnswerChangeset {
        human_answer: field(&body, "human_answer")
            .map_err(AppError::bad_request)?
            .into_blankable(),
        ai_answer: field(&body, "ai_answer")
            .map_err(AppError::bad_request)?
            .into_blankable(),
        status: field(&body, "status")
            .map_err(AppError::bad_request)?
            .into_blankable(),
    };
    if let Some(status) = changeset.status.as_deref() {
        validate_transition(&existing.status, status).map_err(AppError::bad_request)?;
    }

    if changeset.human_answer.is_some() || changeset.ai_answer.is_some() || changeset.status.is_some() {
        diesel::update(generated_answers::table.find(answer_id))
            .set(&changeset)
            .execute(&mut conn)?;
    }

    if changeset.status.as_deref() == Some(STATUS_SENDING) {
        dispatch_answer(&mut conn, state.bot.as_ref(), answer_id).await?;
    }

    let answer: GeneratedAnswer = generated_answers::table.find(answer_id).first(&mut conn)?;
    Ok(Json(answer.into()))
}

/// Moves the answer to SENDING and tries to deliver it right away. Also the
/// way to retry an answer whose earlier delivery failed.
pub async fn send_answer(
    State(state): State<AppState>,
    Path(answer_id): Path<Uuid>,
) -> AppResult<Json<AnswerResponse>> {
    let mut conn = state.db()?;
    let existing: GeneratedAnswer = generated_answers::table.find(answer_id).first(&mut conn)?;
    if existing.status == STATUS_SENT {
        return Err(AppError::conflict("answer was already sent"));
    }

    if existing.status != STATUS_SENDING {
        diesel::update(generated_answers::table.find(answer_id))
            .set(generated_answers::status.eq(STATUS_SENDING))
            .execute(&mut conn)?;
    }
    dispatch_answer(&mut conn, state.bot.as_ref(), answer_id).await?;

    let answer: GeneratedAnswer = generated_answers::table.find(answer_id).first(&mut conn)?;
    Ok(Json(answer.into()))
}
