//! SQLite backend for the Cohort experiment store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Several processes may open the same
//! file; the `(experiment_id, identity)` unique index keeps assignment
//! creation race-free across all of them.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
