use std::collections::HashMap;

use axum::extract::{Json, Path, Query, State};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use diesel::{
    dsl::{count_star, sql},
    pg::Pg,
    prelude::*,
    sql_types::{Bool, Float, Text},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use super::answers::AnswerResponse;
use crate::error::{AppError, AppResult};
use crate::models::{Chat, GeneratedAnswer, TextMessage, User, MESSAGE_TYPES};
use crate::schema::{chats, generated_answers, text_messages, users};
use crate::state::AppState;
use crate::utils::json::field;
use crate::utils::paging::{Page, PageParams};
use crate::utils::search::SEARCH_CONFIG;

#[derive(Deserialize)]
pub struct MessageListQuery {
    pub chat_id: Option<i64>,
    pub sender_id: Option<i64>,
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    pub search: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl MessageListQuery {
    fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }
}

#[derive(Deserialize)]
pub struct BulkTypeRequest {
    pub ids: Vec<Uuid>,
    #[serde(rename = "type")]
    pub message_type: String,
}

#[derive(Serialize)]
pub struct BulkTypeResponse {
    pub updated: usize,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub message_id: i64,
    pub chat_id: Option<i64>,
    pub chat_title: Option<String>,
    pub sender_id: Option<i64>,
    pub sender_name: Option<String>,
    pub date: NaiveDateTime,
    pub text: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub reply_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct MessageDetailResponse {
    #[serde(flatten)]
    pub message: MessageResponse,
    pub reply_to_text: Option<String>,
    pub answer: Option<AnswerResponse>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageListQuery>,
) -> AppResult<Json<Page<MessageResponse>>> {
    if let Some(message_type) = query.message_type.as_deref() {
        check_message_type(message_type)?;
    }

    let mut conn = state.db()?;
    let params = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    let total: i64 = filtered_messages(&query)
        .select(count_star())
        .first(&mut conn)?;

    let mut page_query = filtered_messages(&query);
    if let Some(term) = query.search_term() {
        page_query = page_query.order((
            sql::<Float>(&format!(
                "ts_rank(to_tsvector('{SEARCH_CONFIG}', text_messages.text), websearch_to_tsquery('{SEARCH_CONFIG}', "
            ))
                .bind::<Text, _>(term.to_string())
                .sql("))")
                .desc(),
            text_messages::date.desc(),
        ));
    } else {
        page_query = page_query.order(text_messages::date.desc());
    }
    let rows: Vec<TextMessage> = page_query
        .limit(params.per_page())
        .offset(params.offset())
        .load(&mut conn)?;

    let items = describe_messages(&mut conn, rows)?;
    Ok(Json(Page::new(items, params, total)))
}

fn filtered_messages(query: &MessageListQuery) -> text_messages::BoxedQuery<'_, Pg> {
    let mut q = text_messages::table.into_boxed();
    if let Some(chat_id) = query.chat_id {
        q = q.filter(text_messages::chat_id.eq(chat_id));
    }
    if let Some(sender_id) = query.sender_id {
        q = q.filter(text_messages::sender_id.eq(sender_id));
    }
    if let Some(message_type) = query.message_type.as_deref() {
        q = q.filter(text_messages::message_type.eq(message_type));
    }
    if let Some(from) = query.from {
        q = q.filter(text_messages::date.ge(from.and_hms_opt(0, 0, 0).unwrap_or_default()));
    }
    if let Some(to) = query.to {
        let end = (to + Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default();
        q = q.filter(text_messages::date.lt(end));
    }
    if let Some(term) = query.search_term() {
        q = q.filter(
            sql::<Bool>(&format!(
                "to_tsvector('{SEARCH_CONFIG}', text_messages.text) @@ websearch_to_tsquery('{SEARCH_CONFIG}', "
            ))
            .bind::<Text, _>(term.to_string())
            .sql(")"),
        );
    }
    q
}

/// Attaches chat titles and sender names to a page of messages.
fn describe_messages(
    conn: &mut PgConnection,
    rows: Vec<TextMessage>,
) -> QueryResult<Vec<MessageResponse>> {
    let chat_ids: Vec<i64> = rows.iter().filter_map(|row| row.chat_id).collect();
    let sender_ids: Vec<i64> = rows.iter().filter_map(|row| row.sender_id).collect();

    let chat_titles: HashMap<i64, String> = chats::table
        .filter(chats::id.eq_any(&chat_ids))
        .load::<Chat>(conn)?
        .into_iter()
        .map(|chat| (chat.id, chat.display_title()))
        .collect();
    let sender_names: HashMap<i64, String> = users::table
        .filter(users::uid.eq_any(&sender_ids))
        .load::<User>(conn)?
        .into_iter()
        .map(|user| (user.uid, user.display_name()))
        .collect();

    Ok(rows
        .into_iter()
        .map(|row| MessageResponse {
            chat_title: row.chat_id.and_then(|id| chat_titles.get(&id).cloned()),
            sender_name: row.sender_id.and_then(|id| sender_names.get(&id).cloned()),
            id: row.id,
            message_id: row.message_id,
            chat_id: row.chat_id,
            sender_id: row.sender_id,
            date: row.date,
            text: row.text,
            message_type: row.message_type,
            reply_id: row.reply_id,
        })
        .collect())
}

pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageDetailResponse>> {
    let mut conn = state.db()?;
    let message: TextMessage = text_messages::table.find(id).first(&mut conn)?;
    Ok(Json(message_detail(&mut conn, message)?))
}

pub(crate) fn message_detail(
    conn: &mut PgConnection,
    message: TextMessage,
) -> AppResult<MessageDetailResponse> {
    let reply_to_text = match message.reply_id {
        Some(reply_id) => text_messages::table
            .find(reply_id)
            .select(text_messages::text)
            .first::<String>(conn)
            .optional()?,
        None => None,
    };
    let answer = generated_answers::table
        .filter(generated_answers::text_message_id.eq(message.id))
        .first::<GeneratedAnswer>(conn)
        .optional()?
        .map(AnswerResponse::from);

    let message = describe_messages(conn, vec![message])?
        .pop()
        .ok_or_else(AppError::not_found)?;

    Ok(MessageDetailResponse {
        message,
        reply_to_text,
        answer,
    })
}

pub async fn update_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<MessageDetailResponse>> {
    let message_type = field(&body, "type")
        .map_err(AppError::bad_request)?
        .into_blankable();

    let mut conn = state.db()?;
    let message: TextMessage = match message_type {
        Some(message_type) => {
            check_message_type(&message_type)?;
            diesel::update(text_messages::table.find(id))
                .set(text_messages::message_type.eq(&message_type))
                .get_result(&mut conn)?
        }
        None => text_messages::table.find(id).first(&mut conn)?,
    };

    Ok(Json(message_detail(&mut conn, message)?))
}

pub async fn bulk_set_type(
    State(state): State<AppState>,
    Json(payload): Json<BulkTypeRequest>,
) -> AppResult<Json<BulkTypeResponse>> {
    check_message_type(&payload.message_type)?;
    if payload.ids.is_empty() {
        return Ok(Json(BulkTypeResponse { updated: 0 }));
    }

    let mut conn = state.db()?;
    let updated = diesel::update(text_messages::table.filter(text_messages::id.eq_any(&payload.ids)))
        .set(text_messages::message_type.eq(&payload.message_type))
        .execute(&mut conn)?;

    info!(
        updated,
        message_type = %payload.message_type,
        "bulk message classification"
    );
    Ok(Json(BulkTypeResponse { updated }))
}

fn check_message_type(message_type: &str) -> AppResult<()> {
    if MESSAGE_TYPES.contains(&message_type) {
        Ok(())
    } else {
        Err(AppError::bad_request(format!(
            "unknown message type '{message_type}'"
        )))
    }
}
