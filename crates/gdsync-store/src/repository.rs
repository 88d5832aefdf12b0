//! SQLite implementation of IStateStore
//!
//! The engine's state is one JSON document per account
//! (`{type:"sync", accountId, _id, rootId, changeToken, fileInfo, synced,
//! changesToExecute?}`). The document is serialized with serde_json and
//! written with a single UPSERT statement; SQLite statement atomicity
//! gives replace-on-write without a temp-file dance.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use gdsync_core::domain::SyncState;
use gdsync_core::ports::IStateStore;

use crate::StoreError;

/// SQLite-based implementation of the state store port
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Creates a new store instance over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IStateStore for SqliteStateStore {
    async fn load(&self, account_id: &str) -> anyhow::Result<Option<SyncState>> {
        let row = sqlx::query("SELECT document FROM sync_state WHERE account_id = ?1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("load({account_id}): {e}")))?;

        let Some(row) = row else {
            debug!(account_id, "No stored state");
            return Ok(None);
        };

        let document: String = row.get("document");
        let state: SyncState = serde_json::from_str(&document).map_err(|e| {
            StoreError::SerializationError(format!("state document for {account_id}: {e}"))
        })?;

        debug!(
            account_id,
            entities = state.file_info.len(),
            synced = state.synced,
            "State loaded"
        );
        Ok(Some(state))
    }

    async fn save(&self, account_id: &str, state: &SyncState) -> anyhow::Result<()> {
        let document = serde_json::to_string(state).map_err(|e| {
            StoreError::SerializationError(format!("state document for {account_id}: {e}"))
        })?;

        sqlx::query(
            "INSERT INTO sync_state (account_id, document, updated_at) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(account_id) DO UPDATE SET \
                 document = excluded.document, \
                 updated_at = excluded.updated_at",
        )
        .bind(account_id)
        .bind(&document)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("save({account_id}): {e}")))?;

        debug!(
            account_id,
            bytes = document.len(),
            entities = state.file_info.len(),
            "State saved"
        );
        Ok(())
    }
}
