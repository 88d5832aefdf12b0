//! GDSync Store - Sync-state persistence
//!
//! SQLite-backed document store for the engine's [`SyncState`] document.
//! One row per account; saves replace the whole document atomically.
//! It is a driven (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - connection pool with migration support
//! - [`SqliteStateStore`] - `IStateStore` implementation
//! - [`StoreError`] - error types for store operations
//!
//! [`SyncState`]: gdsync_core::domain::SyncState

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteStateStore;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of the state document failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
