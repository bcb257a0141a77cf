use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use db::models::{NewWorkflow, StepRow, WorkflowRow};
use engine::WorkflowGraph;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowDto {
    pub organization_id: Uuid,
    pub name: String,
    pub graph: Value,
}

/// Persisted chain shape exposed to clients.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub id: Uuid,
    pub step_type: String,
    pub config: Value,
    pub next_step_id: Option<Uuid>,
    pub true_step_id: Option<Uuid>,
    pub false_step_id: Option<Uuid>,
}

impl From<StepRow> for StepView {
    fn from(row: StepRow) -> Self {
        Self {
            id: row.id,
            step_type: row.step_type,
            config: row.config,
            next_step_id: row.next_step_id,
            true_step_id: row.true_step_id,
            false_step_id: row.false_step_id,
        }
    }
}

/// Drafts may be invalid workflows, but they must at least be graphs.
fn check_shape(graph: &Value) -> ApiResult<()> {
    WorkflowGraph::from_value(graph)
        .map(|_| ())
        .map_err(|e| ApiError::BadRequest(format!("malformed graph: {e}")))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowDto>,
) -> ApiResult<(StatusCode, Json<WorkflowRow>)> {
    check_shape(&payload.graph)?;
    let wf = state
        .store
        .create_workflow(NewWorkflow {
            organization_id: payload.organization_id,
            name: payload.name,
            raw_graph: payload.graph,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(wf)))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<WorkflowRow>>> {
    Ok(Json(state.store.list_workflows().await?))
}

pub async fn get(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<WorkflowRow>> {
    Ok(Json(state.store.get_workflow(id).await?))
}

/// Replace the draft graph. The published chain is untouched until the next publish.
pub async fn update_graph(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(graph): Json<Value>,
) -> ApiResult<Json<WorkflowRow>> {
    check_shape(&graph)?;
    Ok(Json(state.store.update_graph(id, graph).await?))
}

pub async fn publish(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let result = state.publisher.publish(id).await?;
    Ok(Json(json!({
        "success": true,
        "steps": result.step_count,
        "version": result.version,
        "droppedEdges": result.dropped_edges,
    })))
}

pub async fn unpublish(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<WorkflowRow>> {
    Ok(Json(state.publisher.unpublish(id).await?))
}

pub async fn steps(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<Vec<StepView>>> {
    let wf = state.store.get_workflow(id).await?;
    let steps = state.store.list_steps(wf.id, wf.version).await?;
    Ok(Json(steps.into_iter().map(StepView::from).collect()))
}
