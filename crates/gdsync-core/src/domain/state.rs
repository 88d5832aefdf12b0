//! Persisted engine state
//!
//! [`SyncState`] is the single JSON document the engine persists per
//! account. It holds everything needed to resume after a restart: the
//! mirrored root id, the change-feed cursor, the full metadata map, and
//! any change batch that was buffered but not yet fully applied when the
//! last save happened.
//!
//! The local `path -> id` index is *derived* state; it is recomputed from
//! `file_info` at load time and never persisted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::file_info::{Change, FileInfo};
use super::newtypes::{ChangeToken, FileId};

/// Document type discriminator stored in the `type` field.
const DOC_TYPE: &str = "sync";

/// The whole-document sync state for one account.
///
/// Saves are whole-document and atomic; partial updates do not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Document discriminator, always `"sync"`
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Owning account
    pub account_id: String,
    /// Store-level document key
    #[serde(rename = "_id")]
    pub id: String,
    /// Id of the remote folder mirrored at the local root
    pub root_id: FileId,
    /// Cursor for the next `changes.list` call; never regresses
    pub change_token: ChangeToken,
    /// Every known entity reachable (or once reachable) under root
    pub file_info: HashMap<FileId, FileInfo>,
    /// True once the first full bootstrap has completed
    pub synced: bool,
    /// Changes fetched from the feed but not yet applied at save time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes_to_execute: Option<Vec<Change>>,
}

impl SyncState {
    /// Create the initial state for an account, before bootstrap.
    pub fn new(account_id: impl Into<String>, root_id: FileId, change_token: ChangeToken) -> Self {
        let account_id = account_id.into();
        Self {
            doc_type: DOC_TYPE.to_string(),
            id: format!("sync/{account_id}"),
            account_id,
            root_id,
            change_token,
            file_info: HashMap::new(),
            synced: false,
            changes_to_execute: None,
        }
    }
}
