//! Compiled step operations.

use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::{DbError, models::StepRow};

/// Delete every step of `workflow_id` whose version is not pinned by a
/// pending or running run. Returns the number of rows removed.
pub async fn delete_superseded_steps<'e, E: PgExecutor<'e>>(
    executor: E,
    workflow_id: Uuid,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        r#"
        DELETE FROM workflow_steps
        WHERE workflow_id = $1
          AND version NOT IN (
              SELECT workflow_version FROM workflow_runs
              WHERE workflow_id = $1 AND status IN ('pending', 'running')
          )
        "#,
    )
    .bind(workflow_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Insert one compiled step.
pub async fn insert_step<'e, E: PgExecutor<'e>>(executor: E, step: &StepRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_steps
            (id, workflow_id, version, position, step_type, config,
             next_step_id, true_step_id, false_step_id, source_node_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(step.id)
    .bind(step.workflow_id)
    .bind(step.version)
    .bind(step.position)
    .bind(&step.step_type)
    .bind(&step.config)
    .bind(step.next_step_id)
    .bind(step.true_step_id)
    .bind(step.false_step_id)
    .bind(&step.source_node_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// Number of stored steps of one compiled version.
pub async fn count_steps<'e, E: PgExecutor<'e>>(
    executor: E,
    workflow_id: Uuid,
    version: i32,
) -> Result<i64, DbError> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM workflow_steps WHERE workflow_id = $1 AND version = $2")
            .bind(workflow_id)
            .bind(version)
            .fetch_one(executor)
            .await?;

    Ok(count)
}

/// Steps of one compiled version, in compilation order.
pub async fn list_steps<'e, E: PgExecutor<'e>>(
    executor: E,
    workflow_id: Uuid,
    version: i32,
) -> Result<Vec<StepRow>, DbError> {
    let rows = sqlx::query_as::<_, StepRow>(
        "SELECT * FROM workflow_steps WHERE workflow_id = $1 AND version = $2 ORDER BY position ASC",
    )
    .bind(workflow_id)
    .bind(version)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}
