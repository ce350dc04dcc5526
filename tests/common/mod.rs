use std::collections::{HashMap, HashSet};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use botreader::auth::jwt::JwtService;
use botreader::auth::password::hash_password;
use botreader::bot_api::{BotApi, BotApiError, BotApiResult, ChatMember, Update};
use botreader::config::{AppConfig, Environment, LegalHours, DEFAULT_BOT_API_BASE_URL};
use botreader::db::{self, PgPool};
use botreader::models::NewStaff;
use botreader::routes;
use botreader::state::AppState;
use chrono::{DateTime, TimeZone, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const TEST_HOST: &str = "localhost";
pub const WELCOME_TEMPLATE: &str = "Hi {user_name} {user_username}, welcome to {group_name}";

#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub text: String,
    pub reply_to_message_id: Option<i64>,
}

/// Stands in for the bot platform: serves scripted updates and records every
/// outbound call.
#[derive(Default)]
pub struct FakeBotApi {
    updates: Mutex<Vec<Update>>,
    fetch_calls: Mutex<u32>,
    failing_fetches: Mutex<u32>,
    null_result: Mutex<bool>,
    sent: Mutex<Vec<SentMessage>>,
    failing_sends: Mutex<bool>,
    deleted: Mutex<Vec<(i64, i64)>>,
    delete_attempts: Mutex<u32>,
    failing_deletes: Mutex<bool>,
    admins: Mutex<HashMap<i64, Vec<ChatMember>>>,
    denied_chats: Mutex<HashSet<i64>>,
}

#[async_trait]
impl BotApi for FakeBotApi {
    async fn get_updates(&self, offset: Option<i64>) -> BotApiResult<Option<Vec<Update>>> {
        *self.fetch_calls.lock().await += 1;

        let mut failing = self.failing_fetches.lock().await;
        if *failing > 0 {
            *failing -= 1;
            return Err(BotApiError::Status {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        if *self.null_result.lock().await {
            return Ok(None);
        }

        let updates = self.updates.lock().await;
        Ok(Some(
            updates
                .iter()
                .filter(|update| offset.map_or(true, |offset| update.update_id >= offset))
                .cloned()
                .collect(),
        ))
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> BotApiResult<()> {
        if *self.failing_sends.lock().await {
            return Err(BotApiError::Status {
                status: 500,
                body: "send failed".into(),
            });
        }
        self.sent.lock().await.push(SentMessage {
            chat_id,
            text: text.to_string(),
            reply_to_message_id,
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> BotApiResult<()> {
        *self.delete_attempts.lock().await += 1;
        if *self.failing_deletes.lock().await {
            return Err(BotApiError::Status {
                status: 400,
                body: "message can't be deleted".into(),
            });
        }
        self.deleted.lock().await.push((chat_id, message_id));
        Ok(())
    }

    async fn get_chat_administrators(&self, chat_id: i64) -> BotApiResult<Vec<ChatMember>> {
        if self.denied_chats.lock().await.contains(&chat_id) {
            return Err(BotApiError::PermissionDenied);
        }
        Ok(self
            .admins
            .lock()
            .await
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[allow(dead_code)]
impl FakeBotApi {
    pub async fn push_updates(&self, updates: impl IntoIterator<Item = Update>) {
        self.updates.lock().await.extend(updates);
    }

    pub async fn fetch_calls(&self) -> u32 {
        *self.fetch_calls.lock().await
    }

    pub async fn fail_next_fetches(&self, count: u32) {
        *self.failing_fetches.lock().await = count;
    }

    pub async fn answer_null(&self, null: bool) {
        *self.null_result.lock().await = null;
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn fail_sends(&self, failing: bool) {
        *self.failing_sends.lock().await = failing;
    }

    pub async fn deleted(&self) -> Vec<(i64, i64)> {
        self.deleted.lock().await.clone()
    }

    pub async fn delete_attempts(&self) -> u32 {
        *self.delete_attempts.lock().await
    }

    pub async fn fail_deletes(&self, failing: bool) {
        *self.failing_deletes.lock().await = failing;
    }

    pub async fn set_admins(&self, chat_id: i64, admin_ids: &[i64]) {
        let members = admin_ids
            .iter()
            .map(|id| {
                serde_json::from_value(json!({
                    "user": { "id": id, "first_name": format!("admin{id}") },
                    "status": "administrator"
                }))
                .expect("valid chat member")
            })
            .collect();
        self.admins.lock().await.insert(chat_id, members);
    }

    pub async fn deny_admin_lookup(&self, chat_id: i64) {
        self.denied_chats.lock().await.insert(chat_id);
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    bot: Arc<FakeBotApi>,
}

impl TestApp {
    /// `None` when no test database is configured; callers skip in that case.
    pub async fn new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL is not set; skipping database test");
            return Ok(None);
        };

        let config = AppConfig {
            environment: Environment::Development,
            debug: false,
            allowed_hosts: vec![TEST_HOST.to_string()],
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            cors_allowed_origin: None,
            bot_token: "test-token".to_string(),
            bot_api_base_url: DEFAULT_BOT_API_BASE_URL.to_string(),
            welcome_message: WELCOME_TEMPLATE.to_string(),
            legal_hours: LegalHours { start: 8, end: 20 },
            local_utc_offset_minutes: 0,
            poll_interval_seconds: 60,
            log_file: PathBuf::from("bale_bot_test.log"),
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let bot = Arc::new(FakeBotApi::default());
        let bot_for_state: Arc<dyn BotApi> = bot.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, bot_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Some(Self { state, router, bot }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(|conn| truncate_all(conn)).await
    }

    #[allow(dead_code)]
    pub fn bot(&self) -> Arc<FakeBotApi> {
        self.bot.clone()
    }

    #[allow(dead_code)]
    pub async fn insert_staff(&self, username: &str, password: &str, role: &str) -> Result<Uuid> {
        let username = username.to_string();
        let password = password.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let account = NewStaff {
                id: Uuid::new_v4(),
                username,
                password_hash: hash_password(&password)?,
                role,
            };
            diesel::insert_into(botreader::schema::staff::table)
                .values(&account)
                .execute(conn)
                .context("failed to insert staff")?;
            Ok(account.id)
        })
        .await
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/login",
                &LoginPayload { username, password },
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.access_token)
    }

    /// Creates a staff account and returns its bearer token.
    #[allow(dead_code)]
    pub async fn staff_token(&self) -> Result<String> {
        self.insert_staff("operator", "s3cret", "staff").await?;
        self.login_token("operator", "s3cret").await
    }

    /// Creates an admin account and returns its bearer token.
    #[allow(dead_code)]
    pub async fn admin_token(&self) -> Result<String> {
        self.insert_staff("supervisor", "s3cret", "admin").await?;
        self.login_token("supervisor", "s3cret").await
    }

    /// Triggers one poll pass through the public reader endpoint.
    #[allow(dead_code)]
    pub async fn read(&self) -> Result<(StatusCode, Value)> {
        let response = self.get("/api/reader", None).await?;
        let status = response.status();
        let body = body_to_vec(response.into_body()).await?;
        Ok((status, serde_json::from_slice(&body)?))
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> axum::http::request::Builder {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", TEST_HOST);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder
    }

    async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let request = self
            .request(Method::POST, path, token)
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        self.send(request).await
    }

    /// POST with a `Cookie` header and no body, the way the console refreshes.
    #[allow(dead_code)]
    pub async fn post_with_cookie(
        &self,
        path: &str,
        cookie: &str,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let request = self
            .request(Method::POST, path, token)
            .header("cookie", cookie)
            .body(Body::empty())?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn post_csv(
        &self,
        path: &str,
        csv: &str,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let request = self
            .request(Method::POST, path, token)
            .header("content-type", "text/csv")
            .body(Body::from(csv.to_string()))?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let request = self
            .request(Method::PATCH, path, token)
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        self.send(request).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let request = self.request(Method::GET, path, token).body(Body::empty())?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn get_from_host(&self, path: &str, host: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header("host", host)
            .body(Body::empty())?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let request = self.request(Method::DELETE, path, token).body(Body::empty())?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn get_json(&self, path: &str, token: &str) -> Result<Value> {
        let response = self.get(path, Some(token)).await?;
        ensure!(
            response.status() == StatusCode::OK,
            "GET {path} failed with status {}",
            response.status()
        );
        let body = body_to_vec(response.into_body()).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_json(response: hyper::Response<Body>) -> Result<Value> {
    let body = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE chat_admins, chat_events, generated_answers, text_messages, memberships, \
         archived_text_messages, chats, users, update_cursor, refresh_tokens, staff \
         RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}

/// Unix timestamp of `hour:00` UTC on a fixed day.
#[allow(dead_code)]
pub fn at_hour(hour: u32) -> i64 {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0)
        .single()
        .expect("valid timestamp")
        .timestamp()
}

#[allow(dead_code)]
pub fn minutes_ago(minutes: i64) -> i64 {
    let then: DateTime<Utc> = Utc::now() - chrono::Duration::minutes(minutes);
    then.timestamp()
}

#[allow(dead_code)]
pub fn group_chat(chat_id: i64) -> Value {
    json!({ "id": chat_id, "type": "group", "title": format!("Group {chat_id}") })
}

#[allow(dead_code)]
pub fn user(user_id: i64, name: &str, username: Option<&str>) -> Value {
    json!({ "id": user_id, "first_name": name, "username": username })
}

#[allow(dead_code)]
pub fn update(update_id: i64, message: Value) -> Update {
    serde_json::from_value(json!({ "update_id": update_id, "message": message }))
        .expect("valid update")
}

#[allow(dead_code)]
pub fn text_update(
    update_id: i64,
    message_id: i64,
    chat_id: i64,
    sender_id: i64,
    text: &str,
    date: i64,
) -> Update {
    update(
        update_id,
        json!({
            "message_id": message_id,
            "date": date,
            "chat": group_chat(chat_id),
            "from": user(sender_id, &format!("user{sender_id}"), None),
            "text": text,
        }),
    )
}

#[allow(dead_code)]
pub fn join_update(update_id: i64, chat_id: i64, members: Vec<Value>, date: i64) -> Update {
    update(
        update_id,
        json!({
            "date": date,
            "chat": group_chat(chat_id),
            "new_chat_members": members,
        }),
    )
}

#[allow(dead_code)]
pub fn leave_update(update_id: i64, chat_id: i64, member: Value, date: i64) -> Update {
    update(
        update_id,
        json!({
            "date": date,
            "chat": group_chat(chat_id),
            "left_chat_member": member,
        }),
    )
}

#[allow(dead_code)]
pub fn forwarded_update(
    update_id: i64,
    message_id: i64,
    chat_id: i64,
    sender_id: i64,
    date: i64,
) -> Update {
    update(
        update_id,
        json!({
            "message_id": message_id,
            "date": date,
            "chat": group_chat(chat_id),
            "from": user(sender_id, &format!("user{sender_id}"), None),
            "text": "forwarded content",
            "forward_from_chat": { "id": -900, "type": "channel", "title": "Elsewhere" },
            "forward_from_message_id": 77,
        }),
    )
}
