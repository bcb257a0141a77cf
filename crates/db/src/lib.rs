//! `db` crate: pure persistence layer.
//!
//! Provides the [`Store`] trait the engine talks to, a Postgres-backed
//! implementation ([`PgStore`]) built on repository functions, and an
//! in-process [`MemoryStore`] with the same atomicity guarantees.
//! No compilation or execution logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod pool;
pub mod postgres;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use memory::MemoryStore;
pub use models::{ExecutionOutcome, RunStatus};
pub use pool::DbPool;
pub use postgres::PgStore;
pub use store::Store;
