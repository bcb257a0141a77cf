//! Run and step-execution operations.

use chrono::Utc;
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::{
    DbError,
    models::{NewRun, RunRow, RunStatus, StepExecutionRow},
};

// ---------------------------------------------------------------------------
// workflow_runs
// ---------------------------------------------------------------------------

/// Create a new run record in `pending` status, pinned to `version`. The
/// accumulated context starts as a copy of the trigger payload.
pub async fn create_run<'e, E: PgExecutor<'e>>(
    executor: E,
    new: &NewRun,
    version: i32,
    step_count: i32,
) -> Result<RunRow, DbError> {
    let row = sqlx::query_as::<_, RunRow>(
        r#"
        INSERT INTO workflow_runs
            (id, workflow_id, workflow_version, step_count, entity_id, trigger_context,
             context, current_step_id, status, started_at, ended_at, last_error)
        VALUES ($1, $2, $3, $4, $5, $6, $6, NULL, 'pending', $7, NULL, NULL)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.workflow_id)
    .bind(version)
    .bind(step_count)
    .bind(&new.entity_id)
    .bind(&new.trigger_context)
    .bind(Utc::now())
    .fetch_one(executor)
    .await?;

    Ok(row)
}

pub async fn get_run<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<RunRow, DbError> {
    sqlx::query_as::<_, RunRow>("SELECT * FROM workflow_runs WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(DbError::NotFound)
}

pub async fn list_runs<'e, E: PgExecutor<'e>>(executor: E, workflow_id: Uuid) -> Result<Vec<RunRow>, DbError> {
    let rows = sqlx::query_as::<_, RunRow>(
        "SELECT * FROM workflow_runs WHERE workflow_id = $1 ORDER BY started_at DESC",
    )
    .bind(workflow_id)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

/// Compare-and-set the status of a run.
///
/// Returns `None` when the run exists but is no longer in `from`.
pub async fn transition_run<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    from: RunStatus,
    to: RunStatus,
    last_error: Option<&str>,
) -> Result<Option<RunRow>, DbError> {
    let ended_at = to.is_terminal().then(Utc::now);

    let row = sqlx::query_as::<_, RunRow>(
        r#"
        UPDATE workflow_runs
        SET status = $1,
            ended_at = COALESCE($2, ended_at),
            last_error = COALESCE($3, last_error)
        WHERE id = $4 AND status = $5
        RETURNING *
        "#,
    )
    .bind(to.as_str())
    .bind(ended_at)
    .bind(last_error)
    .bind(id)
    .bind(from.as_str())
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Update pointer and context of a running run. Returns `false` if the run
/// is not (or no longer) running.
pub async fn update_run_progress<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    current_step_id: Option<Uuid>,
    context: &serde_json::Value,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflow_runs
        SET current_step_id = $1, context = $2
        WHERE id = $3 AND status = 'running'
        "#,
    )
    .bind(current_step_id)
    .bind(context)
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

// ---------------------------------------------------------------------------
// step_executions
// ---------------------------------------------------------------------------

/// Insert one step attempt.
pub async fn insert_step_execution<'e, E: PgExecutor<'e>>(
    executor: E,
    execution: &StepExecutionRow,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO step_executions
            (id, run_id, step_id, step_type, attempt, outcome, started_at, ended_at, error_detail)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(execution.id)
    .bind(execution.run_id)
    .bind(execution.step_id)
    .bind(&execution.step_type)
    .bind(execution.attempt)
    .bind(execution.outcome.as_str())
    .bind(execution.started_at)
    .bind(execution.ended_at)
    .bind(&execution.error_detail)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn list_step_executions<'e, E: PgExecutor<'e>>(
    executor: E,
    run_id: Uuid,
) -> Result<Vec<StepExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, StepExecutionRow>(
        "SELECT * FROM step_executions WHERE run_id = $1 ORDER BY started_at ASC, attempt ASC",
    )
    .bind(run_id)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}
