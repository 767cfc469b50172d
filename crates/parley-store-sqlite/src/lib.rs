//! SQLite backend for the Parley record store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every guarded batch runs inside one
//! immediate transaction on that thread, which is what serialises competing
//! clients.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
