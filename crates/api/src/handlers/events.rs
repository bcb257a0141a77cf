use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::AppState;
use engine::Event;

/// Accept an event and start a run for every matching workflow.
///
/// Responds once the runs exist; their execution continues in the background.
pub async fn ingest(
    State(state): State<AppState>,
    Json(event): Json<Event>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let dispatched = state.dispatcher.dispatch(&event).await?;
    let runs: Vec<Uuid> = dispatched.iter().map(|r| r.run_id).collect();
    Ok((StatusCode::ACCEPTED, Json(json!({ "runs": runs }))))
}
