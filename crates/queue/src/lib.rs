//! `queue` crate: hands matched events to the run engine.
//!
//! Every run is created `pending` up front, then executed in the background.
//! Runs that share a `(workflow_id, entity_id)` go through a per-entity
//! [`lane::Lanes`] lane and execute one at a time in arrival order.

pub mod dispatcher;
pub mod error;
pub mod lane;

pub use dispatcher::{DispatchedRun, Dispatcher};
pub use error::QueueError;
pub use lane::{LaneKey, Lanes};
