//! Reconciler - single writer over state, disk, and remote
//!
//! [`SyncCore`] owns the metadata cache and the persisted cursor, and is
//! the only component that mutates any of the three shared resources:
//! the state document, the local root, and the remote drive. The engine
//! wraps it in one mutex; the change loop and the work queue both lock it
//! for the duration of each action, so actions never interleave.
//!
//! Write order at every suspension point: update cache, then perform the
//! disk operation (with a prior ignore marker), then save. Local
//! filesystem failures while applying a *remote* change are logged and
//! forfeited (the token has already advanced past the buffered batch);
//! remote failures propagate so the caller can abandon the action.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use gdsync_core::domain::{no_change, Change, ChangeToken, DomainError, FileId, FileInfo, SyncState};
use gdsync_core::ports::remote_drive::NewFile;
use gdsync_core::ports::{IRemoteDrive, IStateStore, IStatusNotifier};

use crate::cache::MetadataCache;
use crate::watcher::{IgnoreHandle, PathEvent, PathEventKind};

/// MIME type used when creating remote folders.
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// The local root directory disappeared. Fatal: it is ambiguous whether
/// to recreate the tree or delete everything remote, so the engine exits.
#[derive(Debug, thiserror::Error)]
#[error("local root was removed")]
pub struct LocalRootRemoved;

/// A state-document save failed. Fatal for the current cycle.
#[derive(Debug, thiserror::Error)]
#[error("state store save failed")]
pub struct StateSaveFailed;

/// Outcome of materializing one remote entity on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Content was fetched and written
    Downloaded,
    /// Entity is ignorable (the root, or a sizeless non-folder)
    Ignored,
    /// Entity is a folder; directories were created
    Folder,
    /// Entity resolves to no local path
    Skipped,
}

/// Whether the engine refuses to materialize this entity on disk.
pub fn should_ignore(info: &FileInfo, root_id: &FileId) -> bool {
    info.id == *root_id || (!info.is_folder() && !info.has_content())
}

/// Single-writer core over cache, disk, remote, and persisted state.
pub struct SyncCore {
    pub(crate) remote: Arc<dyn IRemoteDrive>,
    pub(crate) store: Arc<dyn IStateStore>,
    pub(crate) notifier: Arc<dyn IStatusNotifier>,
    pub(crate) ignorer: IgnoreHandle,
    pub(crate) account_id: String,
    pub(crate) cache: MetadataCache,
    pub(crate) change_token: ChangeToken,
    pub(crate) synced: bool,
    pub(crate) syncing: bool,
    pub(crate) changes_to_execute: Option<VecDeque<Change>>,
}

impl SyncCore {
    /// Hydrates a core from a persisted (or freshly initialized) state
    /// document. The path index is recomputed here, never loaded.
    pub fn new(
        remote: Arc<dyn IRemoteDrive>,
        store: Arc<dyn IStateStore>,
        notifier: Arc<dyn IStatusNotifier>,
        local_root: PathBuf,
        state: SyncState,
    ) -> Self {
        let mut cache = MetadataCache::new(state.root_id, local_root);
        cache.load_infos(state.file_info);

        Self {
            remote,
            store,
            notifier,
            ignorer: IgnoreHandle::disconnected(),
            account_id: state.account_id,
            cache,
            change_token: state.change_token,
            synced: state.synced,
            syncing: false,
            changes_to_execute: state.changes_to_execute.map(VecDeque::from),
        }
    }

    /// Wires the watcher's ignore handle in once the watcher exists.
    pub fn set_ignorer(&mut self, ignorer: IgnoreHandle) {
        self.ignorer = ignorer;
    }

    /// Builds the persistable document from the live state.
    pub fn snapshot(&self) -> SyncState {
        SyncState {
            doc_type: "sync".to_string(),
            id: format!("sync/{}", self.account_id),
            account_id: self.account_id.clone(),
            root_id: self.cache.root_id().clone(),
            change_token: self.change_token.clone(),
            file_info: self.cache.snapshot_infos(),
            synced: self.synced,
            changes_to_execute: self
                .changes_to_execute
                .as_ref()
                .map(|queue| queue.iter().cloned().collect()),
        }
    }

    /// Persists the current state as one atomic document replace.
    pub async fn save(&self) -> Result<()> {
        self.store
            .save(&self.account_id, &self.snapshot())
            .await
            .context(StateSaveFailed)
    }

    /// Metadata for an id, served from the cache unless `force_refresh`
    /// is set, in which case the remote is consulted and the cache (and
    /// path index) updated with the answer.
    pub async fn get_info(&mut self, id: &FileId, force_refresh: bool) -> Result<FileInfo> {
        if !force_refresh {
            if let Some(info) = self.cache.get_info(id) {
                return Ok(info.clone());
            }
        }

        let info = self
            .remote
            .get_info(id)
            .await
            .with_context(|| format!("Metadata fetch for {id}"))?;
        self.cache.store_info(info.clone());
        Ok(info)
    }

    // ========================================================================
    // Remote-change application
    // ========================================================================

    /// Applies one change from the remote feed to cache, disk, and state.
    ///
    /// Returns whether the change had any effect (and therefore warrants
    /// a save). Local filesystem failures are forfeited with a warning;
    /// remote failures propagate.
    pub async fn apply_remote_change(&mut self, change: &Change) -> Result<bool> {
        if change.removed || change.file.as_ref().is_some_and(|f| f.trashed) {
            return self.remove_remote_entity(&change.file_id).await;
        }

        let Some(new_info) = change.file.clone() else {
            debug!(file_id = %change.file_id, "Change without file payload, skipping");
            return Ok(false);
        };

        let Some(old_info) = self.cache.get_info(&change.file_id).cloned() else {
            // First sighting of this id. The cache entry only survives a
            // successful materialization; otherwise a retry of this same
            // change would compare against it and no-op.
            debug!(file_id = %change.file_id, name = %new_info.name, "New remote entity");
            self.cache.store_info(new_info.clone());
            if let Err(err) = self.download(&new_info).await {
                self.cache.remove_info(&new_info.id);
                return Err(err);
            }
            return Ok(true);
        };

        let old_paths = self.cache.paths_of(&old_info);
        self.cache.store_info(new_info.clone());
        let new_paths = self.cache.paths_of(&new_info);

        if no_change(&new_info, &old_info) {
            debug!(file_id = %new_info.id, "Metadata unchanged");
            return Ok(false);
        }

        if old_paths.is_empty() && new_paths.is_empty() {
            debug!(file_id = %new_info.id, "Entity lies outside the mirrored tree");
            return Ok(false);
        }

        if new_info.md5_checksum != old_info.md5_checksum {
            debug!(
                file_id = %new_info.id,
                old = ?old_info.md5_checksum,
                new = ?new_info.md5_checksum,
                "Remote content replaced"
            );
            for path in &old_paths {
                self.remove_path(path).await;
            }
            if let Err(err) = self.download(&new_info).await {
                // Roll the cache back so the retry still sees a checksum
                // difference and fetches the content again.
                self.cache.store_info(old_info.clone());
                return Err(err);
            }
            return Ok(true);
        }

        if old_paths.is_empty() && !new_paths.is_empty() {
            debug!(file_id = %new_info.id, "Entity entered the mirrored tree");
            if let Err(err) = self.download(&new_info).await {
                self.cache.store_info(old_info.clone());
                return Err(err);
            }
            // A folder re-entering the tree brings its cached subtree
            // with it, and the feed only mentions the folder itself.
            if new_info.is_folder() {
                if let Err(err) = self.materialize_descendants(&new_paths).await {
                    self.cache.store_info(old_info.clone());
                    return Err(err);
                }
            }
            return Ok(true);
        }

        if should_ignore(&new_info, self.cache.root_id()) {
            return Ok(false);
        }

        if old_paths != new_paths {
            info!(file_id = %new_info.id, "Remote move/rename");
            self.change_paths(&old_paths, &new_paths).await;
            return Ok(true);
        }

        Ok(false)
    }

    /// Removes a remotely-deleted entity: every materialized path goes,
    /// and the id is evicted from the cache.
    async fn remove_remote_entity(&mut self, id: &FileId) -> Result<bool> {
        let existed = self.cache.get_info(id).is_some();
        let removed_paths = self.cache.remove_info(id);

        debug!(
            file_id = %id,
            paths = removed_paths.len(),
            "Remote removal"
        );
        for path in &removed_paths {
            self.remove_path(path).await;
        }

        Ok(existed)
    }

    /// Moves the materialization of an entity from `old` paths to `new`
    /// paths: pairwise renames, then deletions of surplus old paths, then
    /// copies for surplus new paths.
    pub(crate) async fn change_paths(&mut self, old: &[PathBuf], new: &[PathBuf]) {
        let removed: Vec<PathBuf> = old.iter().filter(|p| !new.contains(p)).cloned().collect();
        let added: Vec<PathBuf> = new.iter().filter(|p| !old.contains(p)).cloned().collect();
        let pairs = removed.len().min(added.len());

        for i in 0..pairs {
            let (src, dst) = (&removed[i], &added[i]);
            self.ensure_parent_dir(dst).await;
            self.ignorer.ignore(src);
            self.ignorer.ignore(dst);
            if let Err(err) = tokio::fs::rename(src, dst).await {
                warn!(
                    src = %src.display(),
                    dst = %dst.display(),
                    error = %err,
                    "Rename failed"
                );
            }
        }

        for src in &removed[pairs..] {
            self.remove_path(src).await;
        }

        for dst in &added[pairs..] {
            self.ensure_parent_dir(dst).await;
            self.ignorer.ignore(dst);
            let source = &new[0];
            if source.is_dir() {
                if let Err(err) = tokio::fs::create_dir_all(dst).await {
                    warn!(
                        dst = %dst.display(),
                        error = %err,
                        "Alias directory creation failed"
                    );
                    continue;
                }
                // A re-parented folder arrives in the feed alone; its
                // descendants' parents are unchanged, so the feed never
                // mentions them. Fill the new alias from the cache.
                self.replicate_alias_tree(source, dst).await;
            } else if let Err(err) = tokio::fs::copy(source, dst).await {
                warn!(
                    src = %source.display(),
                    dst = %dst.display(),
                    error = %err,
                    "Alias copy failed"
                );
            }
        }
    }

    /// Materializes every cached descendant of a freshly added folder
    /// alias. `source` is an established alias of the same folder, so
    /// each file's bytes are copied from its counterpart there.
    async fn replicate_alias_tree(&self, source: &Path, dst: &Path) {
        let mut dirs: Vec<PathBuf> = Vec::new();
        let mut files: Vec<PathBuf> = Vec::new();
        for info in self.cache.all_infos() {
            if should_ignore(info, self.cache.root_id()) {
                continue;
            }
            let is_folder = info.is_folder();
            for path in self.cache.paths_of(info) {
                if path.starts_with(dst) && path != dst {
                    if is_folder {
                        dirs.push(path);
                    } else {
                        files.push(path);
                    }
                }
            }
        }

        // Lexicographic order puts parents before their children.
        dirs.sort();
        for dir in &dirs {
            self.ignorer.ignore(dir);
            if let Err(err) = tokio::fs::create_dir_all(dir).await {
                warn!(path = %dir.display(), error = %err, "Directory creation failed");
            }
        }

        for file in &files {
            let Ok(relative) = file.strip_prefix(dst) else {
                continue;
            };
            let origin = source.join(relative);
            self.ensure_parent_dir(file).await;
            self.ignorer.ignore(file);
            if let Err(err) = tokio::fs::copy(&origin, file).await {
                warn!(
                    src = %origin.display(),
                    dst = %file.display(),
                    error = %err,
                    "Alias copy failed"
                );
            }
        }
    }

    /// Downloads every cached entity that resolves beneath one of the
    /// given roots. Used when a folder's subtree becomes reachable again
    /// and no established alias exists to copy from.
    async fn materialize_descendants(&mut self, roots: &[PathBuf]) -> Result<()> {
        let mut descendants: Vec<FileInfo> = Vec::new();
        for info in self.cache.all_infos() {
            let under_a_root = self
                .cache
                .paths_of(info)
                .iter()
                .any(|path| roots.iter().any(|root| path.starts_with(root) && path != root));
            if under_a_root {
                descendants.push(info.clone());
            }
        }

        for info in &descendants {
            self.download(info).await?;
        }
        Ok(())
    }

    /// Materializes one remote entity at every resolved path.
    ///
    /// Folders become directories at each alias; file content is fetched
    /// once and copied to the remaining aliases. Ignorable entities (the
    /// root, sizeless non-folders) are skipped.
    pub(crate) async fn download(&mut self, info: &FileInfo) -> Result<DownloadOutcome> {
        if should_ignore(info, self.cache.root_id()) {
            debug!(file_id = %info.id, name = %info.name, "Ignorable entity, not materialized");
            return Ok(DownloadOutcome::Ignored);
        }

        let paths = self.cache.paths_of(info);
        if paths.is_empty() {
            return Ok(DownloadOutcome::Skipped);
        }

        if info.is_folder() {
            for path in &paths {
                self.ignorer.ignore(path);
                if let Err(err) = tokio::fs::create_dir_all(path).await {
                    warn!(path = %path.display(), error = %err, "Directory creation failed");
                }
            }
            return Ok(DownloadOutcome::Folder);
        }

        let first = &paths[0];
        self.ensure_parent_dir(first).await;
        self.ignorer.ignore(first);
        self.remote
            .download_to(&info.id, first)
            .await
            .with_context(|| format!("Download of {} to {}", info.id, first.display()))?;

        for alias in &paths[1..] {
            self.ensure_parent_dir(alias).await;
            self.ignorer.ignore(alias);
            if let Err(err) = tokio::fs::copy(first, alias).await {
                warn!(
                    src = %first.display(),
                    dst = %alias.display(),
                    error = %err,
                    "Alias copy failed"
                );
            }
        }

        Ok(DownloadOutcome::Downloaded)
    }

    // ========================================================================
    // Local-event reactions
    // ========================================================================

    /// Routes one debounced watcher event to the matching action.
    ///
    /// Removal of the local root itself is fatal and surfaces as
    /// [`LocalRootRemoved`].
    pub async fn dispatch_local_event(&mut self, event: &PathEvent) -> Result<()> {
        if matches!(
            event.kind,
            PathEventKind::Unlink | PathEventKind::UnlinkDir
        ) && event.path == self.cache.local_root()
        {
            return Err(LocalRootRemoved.into());
        }

        match event.kind {
            PathEventKind::Add => self.add_local_file(&event.path).await,
            PathEventKind::Change => self.update_local_file(&event.path).await,
            PathEventKind::AddDir => self.add_local_dir(&event.path).await,
            PathEventKind::Unlink | PathEventKind::UnlinkDir => {
                self.remove_local(&event.path).await
            }
            PathEventKind::Ignore => Ok(()),
        }
    }

    /// A file appeared locally: upload it, or treat as an update if the
    /// path is already mapped.
    pub async fn add_local_file(&mut self, path: &Path) -> Result<()> {
        match self.cache.id_for_path(path).cloned() {
            Some(id) => self.upload_existing(path, &id).await,
            None => self.upload_new(path).await,
        }
    }

    /// A file changed locally: re-upload, or treat as an add if the path
    /// is not yet mapped.
    pub async fn update_local_file(&mut self, path: &Path) -> Result<()> {
        match self.cache.id_for_path(path).cloned() {
            Some(id) => self.upload_existing(path, &id).await,
            None => self.upload_new(path).await,
        }
    }

    /// A directory appeared locally: create the remote folder.
    pub async fn add_local_dir(&mut self, path: &Path) -> Result<()> {
        if self.cache.id_for_path(path).is_some() {
            return Ok(());
        }
        let (parent_id, name) = match self.tracked_parent_and_name(path) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Dropping local event");
                return Ok(());
            }
        };

        let created = self
            .remote
            .create_file(
                &NewFile {
                    name,
                    mime_type: Some(FOLDER_MIME.to_string()),
                    parents: vec![parent_id],
                },
                None,
            )
            .await?;

        info!(path = %path.display(), file_id = %created.id, "Local directory created remotely");
        self.cache.store_info(created);
        self.save().await
    }

    /// A file or directory disappeared locally: delete the remaining
    /// aliases on disk, evict the id, and delete remotely.
    pub async fn remove_local(&mut self, path: &Path) -> Result<()> {
        let Some(id) = self.cache.id_for_path(path).cloned() else {
            debug!(path = %path.display(), "Unlink for untracked path, ignoring");
            return Ok(());
        };

        let removed_paths = self.cache.remove_info(&id);
        for alias in &removed_paths {
            if alias != path {
                self.remove_path(alias).await;
            }
        }

        self.remote
            .delete_file(&id)
            .await
            .with_context(|| format!("Remote delete of {id}"))?;

        info!(path = %path.display(), file_id = %id, "Local removal propagated");
        self.save().await
    }

    /// Uploads a brand-new local file under its mapped parent folder.
    async fn upload_new(&mut self, path: &Path) -> Result<()> {
        let (parent_id, name) = match self.tracked_parent_and_name(path) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Dropping local event");
                return Ok(());
            }
        };

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Read of {}", path.display()))?;

        let created = self
            .remote
            .create_file(
                &NewFile {
                    name,
                    mime_type: None,
                    parents: vec![parent_id],
                },
                Some(bytes),
            )
            .await?;

        info!(path = %path.display(), file_id = %created.id, "Local file uploaded");
        self.cache.store_info(created);
        self.save().await
    }

    /// Re-uploads a tracked file if its content actually changed, then
    /// refreshes the other aliases from the edited copy.
    async fn upload_existing(&mut self, path: &Path, id: &FileId) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Read of {}", path.display()))?;
        let local_md5 = format!("{:x}", md5::compute(&bytes));

        let cached_md5 = self
            .cache
            .get_info(id)
            .and_then(|info| info.md5_checksum.as_deref());
        if cached_md5 == Some(local_md5.as_str()) {
            debug!(path = %path.display(), "Content unchanged, skipping upload");
            return Ok(());
        }

        let updated = self.remote.update_file(id, bytes).await?;
        info!(path = %path.display(), file_id = %id, "Local edit uploaded");
        self.cache.store_info(updated.clone());

        for alias in self.cache.paths_of(&updated) {
            if alias != path {
                self.ignorer.ignore(&alias);
                if let Err(err) = tokio::fs::copy(path, &alias).await {
                    warn!(
                        src = %path.display(),
                        dst = %alias.display(),
                        error = %err,
                        "Alias refresh failed"
                    );
                }
            }
        }

        self.save().await
    }

    // ========================================================================
    // Disk helpers
    // ========================================================================

    /// Looks up the id mapped at the path's parent directory. A missing
    /// mapping is an invariant violation ([`DomainError::PathNotTracked`]);
    /// callers log it and drop the event.
    fn tracked_parent_and_name(&self, path: &Path) -> Result<(FileId, String), DomainError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| DomainError::InvalidFileName(path.display().to_string()))?;

        let parent_id = path
            .parent()
            .and_then(|parent| self.cache.id_for_path(parent))
            .cloned()
            .ok_or_else(|| DomainError::PathNotTracked(path.display().to_string()))?;

        Ok((parent_id, name))
    }

    /// Removes one materialized path, file or directory, with an ignore
    /// marker first. Missing paths and filesystem failures are logged and
    /// forfeited.
    async fn remove_path(&self, path: &Path) {
        self.ignorer.ignore(path);

        let result = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "Local removal failed");
        }
    }

    /// Creates the destination's parent directory if needed.
    async fn ensure_parent_dir(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %err, "Parent creation failed");
            }
        }
    }

    // ========================================================================
    // Change buffer helpers
    // ========================================================================

    /// Head of the buffered change batch, if any.
    pub(crate) fn peek_change(&self) -> Option<Change> {
        self.changes_to_execute
            .as_ref()
            .and_then(|queue| queue.front().cloned())
    }

    /// Drops the head of the buffered change batch.
    pub(crate) fn pop_change(&mut self) {
        if let Some(queue) = self.changes_to_execute.as_mut() {
            queue.pop_front();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn info(id: &str, mime: &str, size: Option<u64>) -> FileInfo {
        FileInfo {
            id: id.parse().unwrap(),
            name: "x".to_string(),
            mime_type: mime.to_string(),
            md5_checksum: None,
            size,
            modified_time: Utc.timestamp_opt(0, 0).unwrap(),
            parents: vec![],
            trashed: false,
        }
    }

    #[test]
    fn test_root_is_ignorable() {
        let root_id: FileId = "root".parse().unwrap();
        let root = info("root", "application/vnd.google-apps.folder", None);
        assert!(should_ignore(&root, &root_id));
    }

    #[test]
    fn test_sizeless_document_is_ignorable() {
        let root_id: FileId = "root".parse().unwrap();
        let doc = info("d", "application/vnd.google-apps.document", None);
        assert!(should_ignore(&doc, &root_id));
    }

    #[test]
    fn test_regular_file_is_not_ignorable() {
        let root_id: FileId = "root".parse().unwrap();
        let file = info("f", "text/plain", Some(3));
        assert!(!should_ignore(&file, &root_id));
    }

    #[test]
    fn test_folder_is_not_ignorable() {
        let root_id: FileId = "root".parse().unwrap();
        let folder = info("a", "application/vnd.google-apps.folder", None);
        assert!(!should_ignore(&folder, &root_id));
    }
}
