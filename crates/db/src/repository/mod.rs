//! Repository functions: one function per database operation.
//!
//! Every function takes any Postgres executor (a `&DbPool` or an open
//! transaction) and returns a `Result<T, DbError>`. No business logic, only SQL.

pub mod runs;
pub mod steps;
pub mod workflows;
