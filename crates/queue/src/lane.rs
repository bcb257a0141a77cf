//! Per-entity FIFO lanes.
//!
//! A lane is an unbounded channel drained by one task. The task exists only
//! while its lane has work; once the channel is empty it unregisters itself
//! and exits. Runs without an entity bypass lanes entirely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::error::{SendError, TryRecvError};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use db::models::RunRow;
use engine::{EngineError, RunEngine};

/// `(workflow_id, entity_id)`.
pub type LaneKey = (Uuid, String);

pub type RunResult = Result<RunRow, EngineError>;

struct Job {
    run_id: Uuid,
    respond: oneshot::Sender<RunResult>,
}

pub struct Lanes {
    engine: Arc<RunEngine>,
    lanes: Mutex<HashMap<LaneKey, mpsc::UnboundedSender<Job>>>,
}

impl Lanes {
    pub fn new(engine: Arc<RunEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            lanes: Mutex::new(HashMap::new()),
        })
    }

    /// Number of lanes with outstanding work.
    pub fn active(&self) -> usize {
        self.lock().len()
    }

    /// Queue `run_id` for execution and return a receiver for its result.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(self: &Arc<Self>, key: Option<LaneKey>, run_id: Uuid) -> oneshot::Receiver<RunResult> {
        let (respond, result) = oneshot::channel();
        let job = Job { run_id, respond };

        let Some(key) = key else {
            let engine = self.engine.clone();
            tokio::spawn(async move {
                let _ = job.respond.send(engine.execute(job.run_id).await);
            });
            return result;
        };

        let mut lanes = self.lock();
        let job = match lanes.get(&key) {
            Some(tx) => match tx.send(job) {
                Ok(()) => {
                    debug!(run_id = %run_id, entity_id = %key.1, "queued behind running lane");
                    return result;
                }
                // The lane's task died; start a fresh one.
                Err(SendError(job)) => job,
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(job);
        lanes.insert(key.clone(), tx);
        drop(lanes);

        tokio::spawn(self.clone().drain(key, rx));
        result
    }

    async fn drain(self: Arc<Self>, key: LaneKey, mut rx: mpsc::UnboundedReceiver<Job>) {
        loop {
            let job = match rx.try_recv() {
                Ok(job) => job,
                Err(TryRecvError::Empty) => {
                    // Re-check under the map lock so a concurrent submit
                    // either lands in this lane or starts a new one.
                    let mut lanes = self.lock();
                    match rx.try_recv() {
                        Ok(job) => job,
                        Err(_) => {
                            lanes.remove(&key);
                            debug!(workflow_id = %key.0, entity_id = %key.1, "lane drained");
                            return;
                        }
                    }
                }
                Err(TryRecvError::Disconnected) => return,
            };
            let outcome = self.engine.execute(job.run_id).await;
            let _ = job.respond.send(outcome);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<LaneKey, mpsc::UnboundedSender<Job>>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
