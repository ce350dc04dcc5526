use axum::{
    body::Bytes,
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
};
use diesel::{
    dsl::{count_star, sql},
    pg::Pg,
    prelude::*,
    sql_types::{Bool, Float, Text},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::archive::{export_csv, import_csv, ImportReport};
use crate::auth::AuthenticatedStaff;
use crate::error::{AppError, AppResult};
use crate::models::ArchivedTextMessage;
use crate::schema::archived_text_messages;
use crate::state::AppState;
use crate::utils::paging::{Page, PageParams};
use crate::utils::search::SEARCH_CONFIG;

#[derive(Deserialize)]
pub struct ArchiveListQuery {
    pub chat_id: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Deserialize)]
pub struct ImportQuery {
    pub chat_id: String,
}

#[derive(Deserialize)]
pub struct ExportQuery {
    pub chat_id: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateArchivedRequest {
    pub hashtags: Vec<String>,
}

#[derive(Serialize)]
pub struct ArchivedResponse {
    pub id: Uuid,
    pub sid: String,
    pub chat_id: String,
    pub text: String,
    pub hashtags: Vec<String>,
}

impl ArchiveListQuery {
    fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

impl From<ArchivedTextMessage> for ArchivedResponse {
    fn from(row: ArchivedTextMessage) -> Self {
        Self {
            id: row.id,
            sid: row.sid,
            chat_id: row.chat_id,
            text: row.text,
            hashtags: row.hashtags,
        }
    }
}

pub async fn list_archive(
    State(state): State<AppState>,
    Query(query): Query<ArchiveListQuery>,
) -> AppResult<Json<Page<ArchivedResponse>>> {
    let mut conn = state.db()?;
    let params = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    let total: i64 = filtered_archive(&query)
        .select(count_star())
        .first(&mut conn)?;

    let mut page_query = filtered_archive(&query);
    if let Some(term) = query.search_term() {
        page_query = page_query.order((
            sql::<Float>(&format!(
                "ts_rank(to_tsvector('{SEARCH_CONFIG}', archived_text_messages.text), websearch_to_tsquery('{SEARCH_CONFIG}', "
            ))
                .bind::<Text, _>(term.to_string())
                .sql("))")
                .desc(),
            archived_text_messages::sid.asc(),
        ));
    } else {
        page_query = page_query.order(archived_text_messages::sid.asc());
    }
    let rows: Vec<ArchivedTextMessage> = page_query
        .limit(params.per_page())
        .offset(params.offset())
        .load(&mut conn)?;

    Ok(Json(Page::new(
        rows.into_iter().map(ArchivedResponse::from).collect(),
        params,
        total,
    )))
}

fn filtered_archive(query: &ArchiveListQuery) -> archived_text_messages::BoxedQuery<'_, Pg> {
    let mut q = archived_text_messages::table.into_boxed();
    if let Some(chat_id) = query.chat_id.as_deref().filter(|id| !id.is_empty()) {
        q = q.filter(archived_text_messages::chat_id.eq(chat_id));
    }
    if let Some(term) = query.search_term() {
        q = q.filter(
            sql::<Bool>(&format!(
                "to_tsvector('{SEARCH_CONFIG}', archived_text_messages.text) @@ websearch_to_tsquery('{SEARCH_CONFIG}', "
            ))
            .bind::<Text, _>(term.to_string())
            .sql(")")
            .or(archived_text_messages::hashtags.contains(vec![term.to_string()])),
        );
    }
    q
}

pub async fn update_archived(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateArchivedRequest>,
) -> AppResult<Json<ArchivedResponse>> {
    let hashtags: Vec<String> = payload
        .hashtags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect();

    let mut conn = state.db()?;
    let row: ArchivedTextMessage = diesel::update(archived_text_messages::table.find(id))
        .set(archived_text_messages::hashtags.eq(&hashtags))
        .get_result(&mut conn)?;
    Ok(Json(row.into()))
}

pub async fn delete_archived(
    State(state): State<AppState>,
    staff: AuthenticatedStaff,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    staff.require_admin()?;
    let mut conn = state.db()?;
    let deleted = diesel::delete(archived_text_messages::table.find(id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    info!(%id, by = %staff.username, "archived message deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// The request body is the CSV document itself. Admins only.
pub async fn import_archive(
    State(state): State<AppState>,
    staff: AuthenticatedStaff,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> AppResult<Json<ImportReport>> {
    staff.require_admin()?;
    let chat_id = query.chat_id.trim();
    if chat_id.is_empty() {
        return Err(AppError::bad_request("chat_id must not be empty"));
    }
    if body.is_empty() {
        return Err(AppError::bad_request("csv body must not be empty"));
    }

    let mut conn = state.db()?;
    let report = import_csv(&mut conn, chat_id, body.as_ref())?;
    Ok(Json(report))
}

pub async fn export_archive(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let mut buffer = Vec::new();
    export_csv(
        &mut conn,
        query.chat_id.as_deref().filter(|id| !id.is_empty()),
        &mut buffer,
    )?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"archived_text_messages.csv\"",
            ),
        ],
        buffer,
    ))
}
