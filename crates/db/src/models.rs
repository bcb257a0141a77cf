//! Row structs that map 1-to-1 onto database tables, plus the two state
//! enumerations persisted alongside them.
//!
//! These are *persistence* models; the authored graph lives here only as
//! opaque JSON. Domain graph types live in the `engine` crate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow definition row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    /// Refreshed from the trigger node on every publish; `None` until then.
    pub trigger_type: Option<String>,
    pub trigger_config: serde_json::Value,
    pub is_active: bool,
    /// Bumped by exactly one on every successful publish. `0` = never published.
    pub version: i32,
    /// Authored graph (nodes + edges), kept verbatim for re-editing.
    pub raw_graph: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Input for creating a draft workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub organization_id: Uuid,
    pub name: String,
    pub raw_graph: serde_json::Value,
}

// ---------------------------------------------------------------------------
// workflow_steps
// ---------------------------------------------------------------------------

/// One compiled step. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StepRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub version: i32,
    /// Compilation (visitation) sequence, not execution order.
    pub position: i32,
    pub step_type: String,
    pub config: serde_json::Value,
    pub next_step_id: Option<Uuid>,
    pub true_step_id: Option<Uuid>,
    pub false_step_id: Option<Uuid>,
    /// Debug backlink to the authored node id.
    pub source_node_id: String,
}

/// A compiled step before the store assigns it a workflow and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStep {
    pub id: Uuid,
    pub position: i32,
    pub step_type: String,
    pub config: serde_json::Value,
    pub next_step_id: Option<Uuid>,
    pub true_step_id: Option<Uuid>,
    pub false_step_id: Option<Uuid>,
    pub source_node_id: String,
}

impl NewStep {
    pub fn into_row(self, workflow_id: Uuid, version: i32) -> StepRow {
        StepRow {
            id: self.id,
            workflow_id,
            version,
            position: self.position,
            step_type: self.step_type,
            config: self.config,
            next_step_id: self.next_step_id,
            true_step_id: self.true_step_id,
            false_step_id: self.false_step_id,
            source_node_id: self.source_node_id,
        }
    }
}

/// Everything one publish swaps in atomically.
#[derive(Debug, Clone)]
pub struct PublishChain {
    pub workflow_id: Uuid,
    pub trigger_type: String,
    pub trigger_config: serde_json::Value,
    pub steps: Vec<NewStep>,
}

// ---------------------------------------------------------------------------
// workflow_runs
// ---------------------------------------------------------------------------

/// Lifecycle of a run.
///
/// `pending -> running -> {succeeded | failed | aborted}`; a pending run may
/// also be aborted before it starts. Terminal states have no way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    /// The transition table. Every pair not listed is rejected.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Aborted) => true,
            (Running, Succeeded) | (Running, Failed) | (Running, Aborted) => true,
            (Pending, _) | (Running, _) => false,
            (Succeeded, _) | (Failed, _) | (Aborted, _) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "running"   => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed"    => Ok(Self::Failed),
            "aborted"   => Ok(Self::Aborted),
            other       => Err(format!("unknown run status: {other}")),
        }
    }
}

/// A persisted run row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Pinned at creation; never changes.
    pub workflow_version: i32,
    /// Number of steps the pinned version had when the run was created.
    pub step_count: i32,
    pub entity_id: Option<String>,
    pub trigger_context: serde_json::Value,
    /// Accumulated context (trigger payload + step patches).
    pub context: serde_json::Value,
    pub current_step_id: Option<Uuid>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for RunRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_version: row.try_get("workflow_version")?,
            step_count: row.try_get("step_count")?,
            entity_id: row.try_get("entity_id")?,
            trigger_context: row.try_get("trigger_context")?,
            context: row.try_get("context")?,
            current_step_id: row.try_get("current_step_id")?,
            status: status.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            last_error: row.try_get("last_error")?,
        })
    }
}

/// Input for creating a run in `pending` status.
///
/// The store pins the workflow's current version when it inserts the run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub workflow_id: Uuid,
    pub entity_id: Option<String>,
    pub trigger_context: serde_json::Value,
}

// ---------------------------------------------------------------------------
// step_executions
// ---------------------------------------------------------------------------

/// Result of one step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failure,
    BranchTrue,
    BranchFalse,
}

impl ExecutionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::BranchTrue => "branch_true",
            Self::BranchFalse => "branch_false",
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionOutcome {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success"      => Ok(Self::Success),
            "failure"      => Ok(Self::Failure),
            "branch_true"  => Ok(Self::BranchTrue),
            "branch_false" => Ok(Self::BranchFalse),
            other          => Err(format!("unknown execution outcome: {other}")),
        }
    }
}

/// A persisted step execution (one attempt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: Uuid,
    pub step_type: String,
    /// 1-based; increases per retry of the same step within the same run.
    pub attempt: i32,
    pub outcome: ExecutionOutcome,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub error_detail: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for StepExecutionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let outcome: String = row.try_get("outcome")?;
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            step_id: row.try_get("step_id")?,
            step_type: row.try_get("step_type")?,
            attempt: row.try_get("attempt")?,
            outcome: outcome.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            error_detail: row.try_get("error_detail")?,
        })
    }
}
