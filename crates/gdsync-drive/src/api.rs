//! Google Drive API wire types
//!
//! JSON shapes returned by the Drive v3 REST endpoints, plus conversion
//! into the domain [`FileInfo`]/[`Change`] types. These are wire DTOs,
//! not domain entities; the provider maps them at the port boundary.
//!
//! Drive serializes `int64` fields (`size`) as decimal strings, so the
//! DTO carries them as strings and parses during conversion.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use gdsync_core::domain::{Change, FileId, FileInfo};

/// Field projection requested for every file resource.
pub const FILE_FIELDS: &str = "id,name,mimeType,md5Checksum,size,modifiedTime,parents,trashed";

// ============================================================================
// File resources
// ============================================================================

/// A `files` resource as returned by `files.get` / `files.list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFileResource {
    /// Opaque file id
    pub id: String,
    /// File or folder name (one path segment)
    #[serde(default)]
    pub name: String,
    /// MIME type; folders use `application/vnd.google-apps.folder`
    #[serde(default)]
    pub mime_type: String,
    /// Hex MD5 of the content (absent for folders and native documents)
    pub md5_checksum: Option<String>,
    /// Content size in bytes, serialized as a decimal string
    pub size: Option<String>,
    /// Last modified timestamp
    pub modified_time: Option<DateTime<Utc>>,
    /// Parent folder ids
    #[serde(default)]
    pub parents: Vec<String>,
    /// Whether the file is in the trash
    #[serde(default)]
    pub trashed: bool,
}

impl DriveFileResource {
    /// Converts the wire resource into the canonical domain type.
    pub fn into_file_info(self) -> Result<FileInfo> {
        let id = FileId::new(self.id).context("Drive resource carried an empty id")?;
        let parents = self
            .parents
            .into_iter()
            .map(FileId::new)
            .collect::<Result<Vec<_>, _>>()
            .context("Drive resource carried an empty parent id")?;

        Ok(FileInfo {
            id,
            name: self.name,
            mime_type: self.mime_type,
            md5_checksum: self.md5_checksum,
            size: self.size.and_then(|s| s.parse().ok()),
            modified_time: self.modified_time.unwrap_or_else(Utc::now),
            parents,
            trashed: self.trashed,
        })
    }
}

/// One page of a `files.list` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListPage {
    #[serde(default)]
    pub files: Vec<DriveFileResource>,
    pub next_page_token: Option<String>,
}

// ============================================================================
// Change feed resources
// ============================================================================

/// A `changes` resource from `changes.list`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveChangeResource {
    /// Id of the changed file
    pub file_id: String,
    /// True when the file was permanently removed
    #[serde(default)]
    pub removed: bool,
    /// Current metadata, absent for removals
    pub file: Option<DriveFileResource>,
}

impl DriveChangeResource {
    /// Converts the wire change into the domain type.
    pub fn into_change(self) -> Result<Change> {
        let file_id = FileId::new(self.file_id).context("Drive change carried an empty id")?;
        let file = self.file.map(DriveFileResource::into_file_info).transpose()?;
        Ok(Change {
            file_id,
            removed: self.removed,
            file,
        })
    }
}

/// One page of a `changes.list` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeListPage {
    #[serde(default)]
    pub changes: Vec<DriveChangeResource>,
    pub next_page_token: Option<String>,
    pub new_start_page_token: Option<String>,
}

/// Response of `changes.getStartPageToken`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPageTokenResponse {
    pub start_page_token: String,
}

// ============================================================================
// Tests
// ============================================================================
