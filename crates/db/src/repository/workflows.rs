//! Workflow definition operations.

use chrono::Utc;
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::{
    DbError,
    models::{NewWorkflow, WorkflowRow},
};

/// Insert a new draft workflow (inactive, version 0).
pub async fn create_workflow<'e, E: PgExecutor<'e>>(
    executor: E,
    new: &NewWorkflow,
) -> Result<WorkflowRow, DbError> {
    let now = Utc::now();

    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"
        INSERT INTO workflows
            (id, organization_id, name, trigger_type, trigger_config, is_active, version,
             raw_graph, created_at, updated_at, published_at)
        VALUES ($1, $2, $3, NULL, 'null'::jsonb, FALSE, 0, $4, $5, $5, NULL)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.organization_id)
    .bind(&new.name)
    .bind(&new.raw_graph)
    .bind(now)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<WorkflowRow, DbError> {
    sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(DbError::NotFound)
}

/// Fetch a workflow and hold its row lock until the transaction ends.
///
/// Serializes concurrent publishes of the same workflow across processes.
pub async fn lock_workflow<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<WorkflowRow, DbError> {
    sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(DbError::NotFound)
}

/// Fetch a workflow under a share lock held until the transaction ends.
///
/// Blocks (and is blocked by) `lock_workflow`, so a run created under it
/// sees either the version before a publish or the one after, never the gap.
pub async fn share_workflow<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<WorkflowRow, DbError> {
    sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows WHERE id = $1 FOR SHARE")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(DbError::NotFound)
}

/// Return all workflows ordered by creation time (newest first).
pub async fn list_workflows<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows ORDER BY created_at DESC")
        .fetch_all(executor)
        .await?;

    Ok(rows)
}

/// Active workflows for one organization and trigger type.
pub async fn list_active_workflows<'e, E: PgExecutor<'e>>(
    executor: E,
    organization_id: Uuid,
    trigger_type: &str,
) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRow>(
        r#"
        SELECT * FROM workflows
        WHERE organization_id = $1 AND trigger_type = $2 AND is_active
        "#,
    )
    .bind(organization_id)
    .bind(trigger_type)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

/// Replace the authored graph of a workflow.
pub async fn update_graph<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    raw_graph: &serde_json::Value,
) -> Result<WorkflowRow, DbError> {
    sqlx::query_as::<_, WorkflowRow>(
        "UPDATE workflows SET raw_graph = $1, updated_at = $2 WHERE id = $3 RETURNING *",
    )
    .bind(raw_graph)
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(DbError::NotFound)
}

/// Clear the active flag.
pub async fn deactivate_workflow<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<WorkflowRow, DbError> {
    sqlx::query_as::<_, WorkflowRow>(
        "UPDATE workflows SET is_active = FALSE, updated_at = $1 WHERE id = $2 RETURNING *",
    )
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(DbError::NotFound)
}

/// Record a successful publish: activate, set the new version and refresh
/// the trigger columns.
pub async fn mark_published<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    version: i32,
    trigger_type: &str,
    trigger_config: &serde_json::Value,
) -> Result<WorkflowRow, DbError> {
    let now = Utc::now();

    sqlx::query_as::<_, WorkflowRow>(
        r#"
        UPDATE workflows
        SET is_active = TRUE, version = $1, trigger_type = $2, trigger_config = $3,
            updated_at = $4, published_at = $4
        WHERE id = $5
        RETURNING *
        "#,
    )
    .bind(version)
    .bind(trigger_type)
    .bind(trigger_config)
    .bind(now)
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(DbError::NotFound)
}
