//! Remote drive port (driven/secondary port)
//!
//! The contract over the cloud file API consumed by the engine. The
//! primary implementation targets the Google Drive v3 REST surface, but
//! the trait only assumes a metadata/content API with an opaque-token
//! change feed.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are
//!   adapter-specific and don't need domain-level classification.
//! - Implementations own paging and the retry-once policy for transient
//!   connectivity faults; callers see one logical call per method.
//! - `download_to` streams directly to the destination path and must
//!   remove partial output on error, so a crashed download can never be
//!   mistaken for a local edit.

use std::path::Path;

use crate::domain::{Change, ChangeToken, FileId, FileInfo};

/// Metadata for a file or folder about to be created remotely.
#[derive(Debug, Clone)]
pub struct NewFile {
    /// One path segment, no separators
    pub name: String,
    /// MIME type; `None` lets the service infer one from the content
    pub mime_type: Option<String>,
    /// Parent folder ids the new entity is filed under
    pub parents: Vec<FileId>,
}

/// One fully-paged result of draining the change feed.
///
/// The adapter follows `nextPageToken` to exhaustion; `new_token` is the
/// `newStartPageToken` from the final page and becomes the cursor for the
/// next drain.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    /// Changes in server order across all pages
    pub changes: Vec<Change>,
    /// Cursor for the next `changes_list` call
    pub new_token: ChangeToken,
}

/// Port trait for remote drive operations
///
/// ## Implementation Notes
///
/// - Every method is wrapped by the retry-once policy: a connection-reset
///   class fault waits 2 seconds and retries exactly once; any other
///   failure propagates immediately.
/// - Paginated listings insert small delays between pages (at least
///   100 ms for structure walks, at least 500 ms between change-list
///   chunks) to stay clear of rate-limit penalties.
#[async_trait::async_trait]
pub trait IRemoteDrive: Send + Sync {
    /// Fetches current metadata for one entity.
    ///
    /// The id `"root"` is accepted as an alias for the account's root
    /// folder and resolves to its real id.
    async fn get_info(&self, id: &FileId) -> anyhow::Result<FileInfo>;

    /// Lists the direct, non-trashed children of a folder, following
    /// pages to exhaustion.
    async fn list_folder(&self, parent: &FileId) -> anyhow::Result<Vec<FileInfo>>;

    /// Streams an entity's content to `dest`, removing partial output on
    /// error. The destination's parent directory must already exist.
    async fn download_to(&self, id: &FileId, dest: &Path) -> anyhow::Result<()>;

    /// Creates a file (with content) or folder (without) and returns the
    /// created entity's metadata.
    async fn create_file(&self, new: &NewFile, body: Option<Vec<u8>>)
        -> anyhow::Result<FileInfo>;

    /// Replaces an existing file's content and returns the refreshed
    /// metadata.
    async fn update_file(&self, id: &FileId, body: Vec<u8>) -> anyhow::Result<FileInfo>;

    /// Permanently deletes an entity.
    async fn delete_file(&self, id: &FileId) -> anyhow::Result<()>;

    /// Fetches the change-feed cursor for "now".
    async fn changes_start_token(&self) -> anyhow::Result<ChangeToken>;

    /// Drains the change feed from `token`, following pages to
    /// exhaustion, and returns the collected changes together with the
    /// advanced cursor.
    async fn changes_list(&self, token: &ChangeToken) -> anyhow::Result<ChangeBatch>;
}
