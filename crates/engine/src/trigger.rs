//! Trigger matching: which active workflows does an event start?
//!
//! A workflow's `trigger_config` is a JSON object of predicates over the
//! event payload:
//!
//! ```json
//! { "stage": "won", "pipeline.id": ["p1", "p2"], "$entityKey": "contact.id" }
//! ```
//!
//! Each `path: expected` entry requires the payload value at the dotted
//! `path` to equal `expected`, or one of its elements when `expected` is an
//! array. Keys starting with `$` are engine options, not predicates. A null
//! or empty config matches every event of the workflow's trigger type.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use db::models::WorkflowRow;
use db::Store;
use executors::condition::lookup_path;

use crate::models::Event;
use crate::EngineError;

/// Trigger-config key naming the payload path of the entity a run acts on.
pub const ENTITY_KEY_OPTION: &str = "$entityKey";

/// Payload path used when a trigger config does not name one.
pub const DEFAULT_ENTITY_KEY: &str = "entityId";

/// Read-only matcher over the store's active workflows.
pub struct TriggerMatcher {
    store: Arc<dyn Store>,
}

impl TriggerMatcher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Every active workflow in the event's organization whose trigger type
    /// and trigger predicate match. No ordering is implied.
    pub async fn matches(&self, event: &Event) -> Result<Vec<WorkflowRow>, EngineError> {
        let candidates = self
            .store
            .list_active_workflows(event.organization_id, &event.event_type)
            .await?;

        let matched: Vec<WorkflowRow> = candidates
            .into_iter()
            .filter(|wf| config_matches(&wf.trigger_config, &event.payload))
            .collect();

        debug!(
            organization_id = %event.organization_id,
            event_type = %event.event_type,
            matched = matched.len(),
            "event matched"
        );
        Ok(matched)
    }
}

/// Evaluate a trigger config against an event payload.
pub fn config_matches(config: &Value, payload: &Value) -> bool {
    match config {
        Value::Null => true,
        Value::Object(predicates) => predicates
            .iter()
            .filter(|(key, _)| !key.starts_with('$'))
            .all(|(path, expected)| {
                let actual = lookup_path(payload, path);
                match expected {
                    Value::Array(options) => actual.is_some_and(|v| options.contains(v)),
                    other => actual == Some(other),
                }
            }),
        other => {
            warn!(config = %other, "trigger config is not an object; never matches");
            false
        }
    }
}

/// Entity id a run acts on, used to serialize runs per `(workflow, entity)`.
///
/// Strings are used verbatim and numbers are stringified; anything else
/// (including a missing value) means the run is not tied to an entity.
pub fn entity_id(config: &Value, payload: &Value) -> Option<String> {
    let key = config
        .get(ENTITY_KEY_OPTION)
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_ENTITY_KEY);
    match lookup_path(payload, key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
