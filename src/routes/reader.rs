use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{json, Value};
use tracing::error;

use crate::{ingest::sync_updates, state::AppState};

/// Runs one poll pass on demand. Any failure rolls the pass back and is
/// reported without detail.
pub async fn read_updates(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match sync_updates(state).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "batches": report.batches,
                "updates_processed": report.updates_processed,
                "messages_stored": report.messages_stored,
            })),
        ),
        Err(err) => {
            error!(error = %err, "reading bot updates failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "can't receive bot data" })),
            )
        }
    }
}
