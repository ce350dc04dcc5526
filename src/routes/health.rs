use axum::{extract::State, http::StatusCode, response::Json};
use diesel::{prelude::*, sql_query};
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let database = state
        .db()
        .ok()
        .map(|mut conn| sql_query("SELECT 1").execute(&mut conn).is_ok())
        .unwrap_or(false);

    if !database {
        warn!("health check could not reach the database");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": false })),
        );
    }
    (StatusCode::OK, Json(json!({ "status": "ok", "database": true })))
}
