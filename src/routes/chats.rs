use axum::extract::{Json, Path, Query, State};
use diesel::{dsl::count_star, pg::Pg, prelude::*};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::models::{Chat, User};
use crate::schema::{chat_admins, chats, memberships, users};
use crate::state::AppState;
use crate::utils::paging::{Page, PageParams};
use crate::utils::search::contains_pattern;

pub const MEMBERS_PER_PAGE: i64 = 20;

#[derive(Deserialize)]
pub struct ChatListQuery {
    #[serde(rename = "type")]
    pub chat_type: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Deserialize)]
pub struct ChatDetailQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: String,
    pub display_title: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<Chat> for ChatResponse {
    fn from(chat: Chat) -> Self {
        Self {
            display_title: chat.display_title(),
            id: chat.id,
            chat_type: chat.chat_type,
            title: chat.title,
            username: chat.username,
            first_name: chat.first_name,
            last_name: chat.last_name,
        }
    }
}

#[derive(Serialize)]
pub struct UserSummary {
    pub uid: i64,
    pub name: String,
    pub username: Option<String>,
    pub display_name: String,
    pub role: String,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            display_name: user.display_name(),
            uid: user.uid,
            name: user.name,
            username: user.username,
            role: user.role,
        }
    }
}

#[derive(Serialize)]
pub struct ChatDetailResponse {
    pub chat: ChatResponse,
    pub admins: Vec<UserSummary>,
    pub members: Page<UserSummary>,
}

pub async fn list_chats(
    State(state): State<AppState>,
    Query(query): Query<ChatListQuery>,
) -> AppResult<Json<Page<ChatResponse>>> {
    let mut conn = state.db()?;
    let params = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    let total: i64 = filtered_chats(&query).select(count_star()).first(&mut conn)?;
    let rows: Vec<Chat> = filtered_chats(&query)
        .order(chats::title.asc())
        .limit(params.per_page())
        .offset(params.offset())
        .load(&mut conn)?;

    Ok(Json(Page::new(
        rows.into_iter().map(ChatResponse::from).collect(),
        params,
        total,
    )))
}

fn filtered_chats(query: &ChatListQuery) -> chats::BoxedQuery<'_, Pg> {
    let mut q = chats::table.into_boxed();
    if let Some(chat_type) = query.chat_type.as_deref().filter(|t| !t.is_empty()) {
        q = q.filter(chats::chat_type.eq(chat_type));
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        q = q.filter(
            chats::title
                .ilike(pattern.clone())
                .or(chats::username.ilike(pattern.clone()))
                .or(chats::first_name.ilike(pattern.clone()))
                .or(chats::last_name.ilike(pattern)),
        );
    }
    q
}

pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Query(query): Query<ChatDetailQuery>,
) -> AppResult<Json<ChatDetailResponse>> {
    let mut conn = state.db()?;
    let chat: Chat = chats::table.find(chat_id).first(&mut conn)?;

    let admins: Vec<User> = users::table
        .inner_join(chat_admins::table)
        .filter(chat_admins::chat_id.eq(chat_id))
        .select(users::all_columns)
        .order(users::name.asc())
        .load(&mut conn)?;

    let params = PageParams {
        page: query.page,
        per_page: query.per_page,
    }
    .with_default(MEMBERS_PER_PAGE);
    let active = memberships::table
        .filter(memberships::chat_id.eq(chat_id))
        .filter(memberships::exited.eq(false));
    let total: i64 = active.select(count_star()).first(&mut conn)?;
    let members: Vec<User> = users::table
        .inner_join(memberships::table)
        .filter(memberships::chat_id.eq(chat_id))
        .filter(memberships::exited.eq(false))
        .select(users::all_columns)
        .order(users::name.asc())
        .limit(params.per_page())
        .offset(params.offset())
        .load(&mut conn)?;

    Ok(Json(ChatDetailResponse {
        chat: chat.into(),
        admins: admins.into_iter().map(UserSummary::from).collect(),
        members: Page::new(
            members.into_iter().map(UserSummary::from).collect(),
            params,
            total,
        ),
    }))
}
