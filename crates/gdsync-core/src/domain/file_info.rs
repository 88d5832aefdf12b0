//! Canonical remote metadata
//!
//! [`FileInfo`] is the engine's authoritative representation of one remote
//! entity, and [`Change`] is one event from the change feed. The entity
//! graph is kept as a flat `id -> FileInfo` map; local paths are derived
//! on demand, never stored on the entity itself. Remote files may carry
//! several parents, so one `FileInfo` can materialize at several local
//! paths.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::FileId;

/// Metadata of one remote file or folder, as projected by the drive API.
///
/// Field names serialize in the wire spelling (`mimeType`, `md5Checksum`,
/// `modifiedTime`) so the persisted state document matches the remote
/// vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Opaque identifier, stable across renames and moves
    pub id: FileId,
    /// One path segment; never contains a separator
    pub name: String,
    /// MIME type; the literal "folder" substring denotes a directory
    pub mime_type: String,
    /// Hex MD5 of the content, absent for folders and native documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5_checksum: Option<String>,
    /// Content size in bytes, absent for folders and native documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Remote last-modified timestamp (RFC 3339)
    pub modified_time: DateTime<Utc>,
    /// Parent folder ids; empty when the entity sits outside any folder
    #[serde(default)]
    pub parents: Vec<FileId>,
    /// Whether the entity is in the remote trash
    #[serde(default)]
    pub trashed: bool,
}

impl FileInfo {
    /// Whether this entity is a folder.
    pub fn is_folder(&self) -> bool {
        self.mime_type.contains("folder")
    }

    /// Whether this entity has downloadable content.
    ///
    /// Native editor documents expose no `size` and cannot be fetched as
    /// bytes; the engine skips them.
    pub fn has_content(&self) -> bool {
        self.size.is_some()
    }
}

/// One event from the remote change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Id of the affected entity
    pub file_id: FileId,
    /// True when the entity was permanently removed
    #[serde(default)]
    pub removed: bool,
    /// Current metadata; absent when `removed` is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileInfo>,
}

/// Whether `new` carries no actionable difference over `old`.
///
/// Name and parents are compared structurally (parents as a set), while
/// the timestamp comparison is deliberately one-sided: only a strictly
/// newer `modified_time` counts as a change. A regressed or equal
/// timestamp is treated as a non-change, which guards against the feed
/// replaying stale metadata after a crash.
pub fn no_change(new: &FileInfo, old: &FileInfo) -> bool {
    let new_parents: HashSet<&FileId> = new.parents.iter().collect();
    let old_parents: HashSet<&FileId> = old.parents.iter().collect();

    new.name == old.name && new_parents == old_parents && new.modified_time <= old.modified_time
}
