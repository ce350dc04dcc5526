use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{DateTime, Duration, Utc};
use diesel::{pg::PgConnection, prelude::*};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedStaff, StaffRole},
    config::AppConfig,
    error::{AppError, AppResult},
    models::{NewRefreshToken, Staff},
    schema::{refresh_tokens, staff},
    state::AppState,
};

const REFRESH_COOKIE_NAME: &str = "botreader_refresh";
const REFRESH_COOKIE_PATH: &str = "/api/auth";

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct StaffProfile {
    pub staff_id: Uuid,
    pub username: String,
    pub role: StaffRole,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub staff: StaffProfile,
}

type SessionReply = (HeaderMap, Json<SessionResponse>);

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<SessionReply> {
    let mut conn = state.db()?;

    let account: Option<Staff> = staff::table
        .filter(staff::username.eq(payload.username.trim()))
        .first(&mut conn)
        .optional()?;
    let Some(account) = account else {
        warn!(username = %payload.username, "login for unknown staff account");
        return Err(AppError::unauthorized());
    };

    let valid = password::verify_password(&payload.password, &account.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        warn!(username = %account.username, "login with wrong password");
        return Err(AppError::unauthorized());
    }

    let reply = open_session(&mut conn, &state, &account)?;
    info!(username = %account.username, role = %account.role, "staff logged in");
    Ok(reply)
}

/// Trades a live refresh cookie for a new session. The presented token is
/// revoked in the same statement that reads it, so it works exactly once.
pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<SessionReply> {
    let presented = jar
        .as_ref()
        .and_then(|TypedHeader(cookies)| cookies.get(REFRESH_COOKIE_NAME))
        .ok_or_else(AppError::unauthorized)?;

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let staff_id: Option<Uuid> = diesel::update(
        refresh_tokens::table
            .filter(refresh_tokens::token_hash.eq(hash_refresh_token(presented)))
            .filter(refresh_tokens::revoked_at.is_null())
            .filter(refresh_tokens::expires_at.gt(now)),
    )
    .set(refresh_tokens::revoked_at.eq(now))
    .returning(refresh_tokens::staff_id)
    .get_result(&mut conn)
    .optional()?;
    let staff_id = staff_id.ok_or_else(AppError::unauthorized)?;

    let account: Staff = staff::table
        .find(staff_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;
    open_session(&mut conn, &state, &account)
}

/// Ends every session of the calling account.
pub async fn logout(
    State(state): State<AppState>,
    caller: AuthenticatedStaff,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let revoked = diesel::update(
        refresh_tokens::table
            .filter(refresh_tokens::staff_id.eq(caller.staff_id))
            .filter(refresh_tokens::revoked_at.is_null()),
    )
    .set(refresh_tokens::revoked_at.eq(Utc::now().naive_utc()))
    .execute(&mut conn)?;
    info!(username = %caller.username, revoked, "staff logged out");

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, refresh_cookie(&state.config, None)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

/// The calling account as currently stored; a deleted account is logged out.
pub async fn me(
    State(state): State<AppState>,
    caller: AuthenticatedStaff,
) -> AppResult<Json<StaffProfile>> {
    let mut conn = state.db()?;
    let account: Staff = staff::table
        .find(caller.staff_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;
    Ok(Json(StaffProfile {
        staff_id: account.id,
        role: account_role(&account)?,
        username: account.username,
    }))
}

/// Issues an access token plus a fresh refresh cookie for `account`.
fn open_session(
    conn: &mut PgConnection,
    state: &AppState,
    account: &Staff,
) -> AppResult<SessionReply> {
    let role = account_role(account)?;
    let access_token = state
        .jwt
        .generate_token(account.id, &account.username, role)?;

    let now = Utc::now();
    let refresh_value = generate_refresh_token();
    let expires_at = now + Duration::days(state.config.refresh_token_expiry_days);
    diesel::insert_into(refresh_tokens::table)
        .values(&NewRefreshToken {
            id: Uuid::new_v4(),
            staff_id: account.id,
            token_hash: hash_refresh_token(&refresh_value),
            issued_at: now.naive_utc(),
            expires_at: expires_at.naive_utc(),
        })
        .execute(conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        refresh_cookie(&state.config, Some((&refresh_value, expires_at)))?,
    );

    Ok((
        headers,
        Json(SessionResponse {
            access_token,
            token_type: "Bearer",
            expires_in: state.config.jwt_expiry_minutes * 60,
            staff: StaffProfile {
                staff_id: account.id,
                username: account.username.clone(),
                role,
            },
        }),
    ))
}

/// Accounts with a role outside the known set cannot sign in.
fn account_role(account: &Staff) -> AppResult<StaffRole> {
    account.role.parse().map_err(|err: String| {
        warn!(username = %account.username, error = %err, "staff account has an unusable role");
        AppError::unauthorized()
    })
}

fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `Set-Cookie` for the refresh token; `None` expires the cookie.
fn refresh_cookie(
    config: &AppConfig,
    token: Option<(&str, DateTime<Utc>)>,
) -> AppResult<HeaderValue> {
    let mut cookie = match token {
        Some((value, expires_at)) => format!(
            "{REFRESH_COOKIE_NAME}={value}; Max-Age={}; Expires={}",
            Duration::days(config.refresh_token_expiry_days).num_seconds(),
            expires_at.format("%a, %d %b %Y %H:%M:%S GMT"),
        ),
        None => format!("{REFRESH_COOKIE_NAME}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT"),
    };
    cookie.push_str(&format!("; Path={REFRESH_COOKIE_PATH}; HttpOnly; SameSite=Strict"));
    if config.refresh_cookie_secure {
        cookie.push_str("; Secure");
    }
    if let Some(domain) = &config.refresh_cookie_domain {
        cookie.push_str(&format!("; Domain={domain}"));
    }
    HeaderValue::from_str(&cookie).map_err(AppError::internal)
}
