use axum::http::{header::HOST, HeaderValue};
use axum::{
    extract::{DefaultBodyLimit, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedStaff, error::AppError, state::AppState};

pub mod answers;
pub mod archive;
pub mod auth;
pub mod chats;
pub mod health;
pub mod messages;
pub mod reader;
pub mod users;

const DEBUG_HOSTS: &[&str] = &["localhost", ".localhost", "127.0.0.1", "[::1]"];

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .filter_map(|value| match value.parse::<HeaderValue>() {
                Ok(header) => Some(header),
                Err(_) => {
                    warn!(origin = value, "ignoring invalid CORS allowed origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let chats_routes = Router::new()
        .route("/", get(chats::list_chats))
        .route("/:id", get(chats::get_chat));

    let users_routes = Router::new()
        .route("/", get(users::list_users))
        .route("/:uid", patch(users::update_user));

    let messages_routes = Router::new()
        .route("/", get(messages::list_messages))
        .route("/bulk/type", post(messages::bulk_set_type))
        .route(
            "/:id",
            get(messages::get_message).patch(messages::update_message),
        )
        .route("/:id/answer", post(answers::create_answer));

    let answers_routes = Router::new()
        .route("/:id", patch(answers::update_answer))
        .route("/:id/send", post(answers::send_answer));

    let archive_routes = Router::new()
        .route("/", get(archive::list_archive))
        .route("/import", post(archive::import_archive))
        .route("/export", get(archive::export_archive))
        .route(
            "/:id",
            patch(archive::update_archived).delete(archive::delete_archived),
        );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/chats", chats_routes)
        .nest("/api/users", users_routes)
        .nest("/api/messages", messages_routes)
        .nest("/api/answers", answers_routes)
        .nest("/api/archive", archive_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedStaff, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/reader", get(reader::read_updates))
        .route("/api/health", get(health::health_check))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            enforce_allowed_hosts,
        ))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024 * 16))
}

async fn enforce_allowed_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|authority| authority.to_string()));

    match host {
        Some(host) if host_is_allowed(&host, &state.config.allowed_hosts, state.config.debug) => {
            next.run(request).await
        }
        other => {
            warn!(host = ?other, "rejected request for a disallowed host");
            AppError::bad_request("invalid host header").into_response()
        }
    }
}

/// Matches a `Host` header value against the allowed host patterns. `*`
/// matches anything and `.example.com` matches the domain and all of its
/// subdomains. With no patterns configured only local hosts pass, and only in
/// debug mode.
pub fn host_is_allowed(host: &str, allowed: &[String], debug: bool) -> bool {
    let host = strip_port(host.trim()).to_ascii_lowercase();
    if host.is_empty() {
        return false;
    }

    let matches = |pattern: &str| {
        let pattern = pattern.to_ascii_lowercase();
        if pattern == "*" {
            return true;
        }
        match pattern.strip_prefix('.') {
            Some(domain) => host == domain || host.ends_with(&pattern),
            None => host == pattern,
        }
    };

    if allowed.is_empty() {
        return debug && DEBUG_HOSTS.iter().any(|pattern| matches(pattern));
    }
    allowed.iter().any(|pattern| matches(pattern))
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
