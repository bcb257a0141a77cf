use thiserror::Error;
use uuid::Uuid;

use engine::EngineError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The task executing the run went away without reporting back.
    #[error("run {0} was dropped before it finished")]
    Dropped(Uuid),
}
