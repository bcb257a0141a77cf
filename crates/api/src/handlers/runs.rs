use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::AppState;
use db::models::{RunRow, StepExecutionRow};

pub async fn get(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<RunRow>> {
    Ok(Json(state.store.get_run(id).await?))
}

pub async fn executions(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<StepExecutionRow>>> {
    let run = state.store.get_run(id).await?;
    Ok(Json(state.store.list_step_executions(run.id).await?))
}

pub async fn abort(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<RunRow>> {
    Ok(Json(state.dispatcher.engine().abort(id).await?))
}
