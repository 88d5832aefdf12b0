//! State store port (driven/secondary port)
//!
//! Persistence contract for the whole-document [`SyncState`]. The store
//! is a key-value document store keyed by account id.
//!
//! ## Design Notes
//!
//! - Saves are whole-document; the store guarantees atomic
//!   replace-on-write. A crashed save leaves the previous document
//!   intact.
//! - Uses `anyhow::Result` because storage errors are adapter-specific.

use crate::domain::SyncState;

/// Port trait for persistent sync-state storage
#[async_trait::async_trait]
pub trait IStateStore: Send + Sync {
    /// Loads the state document for an account, or `None` on first run.
    async fn load(&self, account_id: &str) -> anyhow::Result<Option<SyncState>>;

    /// Atomically replaces the state document for an account.
    async fn save(&self, account_id: &str, state: &SyncState) -> anyhow::Result<()>;
}
