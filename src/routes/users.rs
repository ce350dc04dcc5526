use std::collections::HashMap;

use axum::extract::{Json, Path, Query, State};
use diesel::{dsl::count_star, pg::Pg, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthenticatedStaff;
use crate::error::{AppError, AppResult};
use crate::models::{User, USER_ROLES};
use crate::schema::{memberships, text_messages, users};
use crate::state::AppState;
use crate::utils::json::field;
use crate::utils::paging::{Page, PageParams};
use crate::utils::search::contains_pattern;

#[derive(Deserialize)]
pub struct UserListQuery {
    pub chat_id: Option<i64>,
    pub role: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct UpdateUserChangeset {
    first_name: Option<String>,
    last_name: Option<String>,
    mobile: Option<String>,
    role: Option<String>,
}

/// Per-sender tallies over stored messages.
#[derive(Serialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageCounts {
    pub messages: i64,
    pub replies: i64,
    pub questions: i64,
    pub answers_and_suggestions: i64,
}

impl MessageCounts {
    fn record(&mut self, is_reply: bool, message_type: &str) {
        self.messages += 1;
        if is_reply {
            self.replies += 1;
        }
        match message_type {
            "QUESTION" => self.questions += 1,
            "ANSWER" | "SUGGESTION" => self.answers_and_suggestions += 1,
            _ => {}
        }
    }
}

#[derive(Serialize)]
pub struct UserResponse {
    pub uid: i64,
    pub name: String,
    pub username: Option<String>,
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
    pub mobile: String,
    pub role: String,
    pub counts: MessageCounts,
}

impl UserResponse {
    fn new(user: User, counts: MessageCounts) -> Self {
        Self {
            display_name: user.display_name(),
            uid: user.uid,
            name: user.name,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            mobile: user.mobile,
            role: user.role,
            counts,
        }
    }
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> AppResult<Json<Page<UserResponse>>> {
    if let Some(role) = query.role.as_deref() {
        if !USER_ROLES.contains(&role) {
            return Err(AppError::bad_request(format!("unknown role '{role}'")));
        }
    }

    let mut conn = state.db()?;
    let params = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    let total: i64 = filtered_users(&query).select(count_star()).first(&mut conn)?;
    let rows: Vec<User> = filtered_users(&query)
        .order(users::name.asc())
        .limit(params.per_page())
        .offset(params.offset())
        .load(&mut conn)?;

    let uids: Vec<i64> = rows.iter().map(|user| user.uid).collect();
    let counts = message_counts(&mut conn, &uids)?;

    let items = rows
        .into_iter()
        .map(|user| {
            let tally = counts.get(&user.uid).copied().unwrap_or_default();
            UserResponse::new(user, tally)
        })
        .collect();
    Ok(Json(Page::new(items, params, total)))
}

fn filtered_users(query: &UserListQuery) -> users::BoxedQuery<'_, Pg> {
    let mut q = users::table.into_boxed();
    if let Some(chat_id) = query.chat_id {
        q = q.filter(
            users::uid.eq_any(
                memberships::table
                    .filter(memberships::chat_id.eq(chat_id))
                    .select(memberships::member_id),
            ),
        );
    }
    if let Some(role) = query.role.as_deref() {
        q = q.filter(users::role.eq(role));
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        q = q.filter(
            users::name
                .ilike(pattern.clone())
                .or(users::username.ilike(pattern.clone()))
                .or(users::first_name.ilike(pattern.clone()))
                .or(users::last_name.ilike(pattern.clone()))
                .or(users::mobile.ilike(pattern)),
        );
    }
    q
}

fn message_counts(
    conn: &mut PgConnection,
    uids: &[i64],
) -> QueryResult<HashMap<i64, MessageCounts>> {
    if uids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(Option<i64>, Option<Uuid>, String)> = text_messages::table
        .filter(text_messages::sender_id.eq_any(uids))
        .select((
            text_messages::sender_id,
            text_messages::reply_id,
            text_messages::message_type,
        ))
        .load(conn)?;

    let mut counts: HashMap<i64, MessageCounts> = HashMap::new();
    for (sender_id, reply_id, message_type) in rows {
        if let Some(sender_id) = sender_id {
            counts
                .entry(sender_id)
                .or_default()
                .record(reply_id.is_some(), &message_type);
        }
    }
    Ok(counts)
}

/// Role assignment is reserved to admins; contact fields are open to all staff.
pub async fn update_user(
    State(state): State<AppState>,
    staff: AuthenticatedStaff,
    Path(uid): Path<i64>,
    Json(body): Json<Value>,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;
    let existing: User = users::table.find(uid).first(&mut conn)?;

    let changeset = UpdateUserChangeset {
        first_name: field(&body, "first_name")
            .map_err(AppError::bad_request)?
            .into_blankable(),
        last_name: field(&body, "last_name")
            .map_err(AppError::bad_request)?
            .into_blankable(),
        mobile: field(&body, "mobile")
            .map_err(AppError::bad_request)?
            .into_blankable(),
        role: field(&body, "role")
            .map_err(AppError::bad_request)?
            .into_blankable(),
    };

    if let Some(role) = changeset.role.as_deref() {
        staff.require_admin()?;
        if !USER_ROLES.contains(&role) {
            return Err(AppError::bad_request(format!("unknown role '{role}'")));
        }
    }

    let user = if changeset.first_name.is_none()
        && changeset.last_name.is_none()
        && changeset.mobile.is_none()
        && changeset.role.is_none()
    {
        existing
    } else {
        diesel::update(users::table.find(uid))
            .set(&changeset)
            .get_result(&mut conn)?
    };

    let counts = message_counts(&mut conn, &[user.uid])?;
    let tally = counts.get(&user.uid).copied().unwrap_or_default();
    Ok(Json(UserResponse::new(user, tally)))
}
