//! Persistence Store
//!
//! The timer service never holds entities across ticks. Each tick opens a
//! fresh [`StoreSession`] from a [`SessionFactory`], works through it, and
//! drops it. Every mutating call commits on its own, so a crash between two
//! calls leaves the first one applied.
//!
//! Backends:
//! - `sqlite`: sqlx-backed store (feature `sqlite`, on by default)
//! - `memory`: in-process store for development and tests

pub mod memory;
pub mod session;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use thiserror::Error;

pub use memory::{MemoryStore, StoreOperation};
pub use session::{SessionFactory, StoreSession};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[error("Row not found: {table} id {id}")]
    NotFound { table: &'static str, id: i64 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
