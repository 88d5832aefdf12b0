//! Shared test doubles for the engine integration tests
//!
//! `FakeDrive` is an in-memory remote: a metadata map, a content map, and
//! a scripted queue of change batches. `FakeStore` keeps state documents
//! in a HashMap. Both record the calls the engine makes so tests can
//! assert on the remote traffic, not just on local effects.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use chrono::{TimeZone, Utc};

use gdsync_core::config::Config;
use gdsync_core::domain::{Change, ChangeToken, FileId, FileInfo, SyncState};
use gdsync_core::ports::remote_drive::{ChangeBatch, IRemoteDrive, NewFile};
use gdsync_core::ports::{IStateStore, IStatusNotifier};

// ============================================================================
// Builders
// ============================================================================

pub const ROOT_ID: &str = "root-id";

pub fn fid(s: &str) -> FileId {
    s.parse().unwrap()
}

pub fn folder(id: &str, name: &str, parents: &[&str], mtime: i64) -> FileInfo {
    FileInfo {
        id: id.parse().unwrap(),
        name: name.to_string(),
        mime_type: "application/vnd.google-apps.folder".to_string(),
        md5_checksum: None,
        size: None,
        modified_time: Utc.timestamp_opt(mtime, 0).unwrap(),
        parents: parents.iter().map(|p| p.parse().unwrap()).collect(),
        trashed: false,
    }
}

pub fn file(id: &str, name: &str, parents: &[&str], content: &[u8], mtime: i64) -> FileInfo {
    FileInfo {
        id: id.parse().unwrap(),
        name: name.to_string(),
        mime_type: "text/plain".to_string(),
        md5_checksum: Some(format!("{:x}", md5::compute(content))),
        size: Some(content.len() as u64),
        modified_time: Utc.timestamp_opt(mtime, 0).unwrap(),
        parents: parents.iter().map(|p| p.parse().unwrap()).collect(),
        trashed: false,
    }
}

pub fn native_doc(id: &str, name: &str, parents: &[&str], mtime: i64) -> FileInfo {
    FileInfo {
        id: id.parse().unwrap(),
        name: name.to_string(),
        mime_type: "application/vnd.google-apps.document".to_string(),
        md5_checksum: None,
        size: None,
        modified_time: Utc.timestamp_opt(mtime, 0).unwrap(),
        parents: parents.iter().map(|p| p.parse().unwrap()).collect(),
        trashed: false,
    }
}

pub fn update_of(info: &FileInfo) -> Change {
    Change {
        file_id: info.id.clone(),
        removed: false,
        file: Some(info.clone()),
    }
}

pub fn removal_of(id: &str) -> Change {
    Change {
        file_id: id.parse().unwrap(),
        removed: true,
        file: None,
    }
}

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.sync.root = root.to_path_buf();
    config.remote.account_id = "test".to_string();
    config.remote.root_folder_id = Some(ROOT_ID.to_string());
    config
}

// ============================================================================
// FakeDrive
// ============================================================================

#[derive(Default)]
pub struct FakeDriveState {
    pub infos: HashMap<FileId, FileInfo>,
    pub contents: HashMap<FileId, Vec<u8>>,
    pub batches: VecDeque<ChangeBatch>,
    /// Downloads of these ids fail with a permanent error.
    pub failing_downloads: HashSet<FileId>,
    /// Recorded create calls: metadata plus body.
    pub created: Vec<(NewFile, Option<Vec<u8>>)>,
    /// Recorded update calls.
    pub updated: Vec<FileId>,
    /// Recorded delete calls.
    pub deleted: Vec<FileId>,
    /// Per-id download counts.
    pub download_counts: HashMap<FileId, u32>,
    /// Number of changes_list calls observed.
    pub changes_list_calls: u32,
    next_generated: u32,
}

pub struct FakeDrive {
    pub state: Mutex<FakeDriveState>,
    start_token: String,
}

impl FakeDrive {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeDriveState::default()),
            start_token: "10".to_string(),
        }
    }

    pub fn with_entities(entities: Vec<(FileInfo, Option<Vec<u8>>)>) -> Self {
        let drive = Self::new();
        {
            let mut state = drive.state.lock().unwrap();
            for (info, content) in entities {
                if let Some(content) = content {
                    state.contents.insert(info.id.clone(), content);
                }
                state.infos.insert(info.id.clone(), info);
            }
        }
        drive
    }

    pub fn push_batch(&self, changes: Vec<Change>, new_token: &str) {
        let mut state = self.state.lock().unwrap();
        // Keep the remote's own view consistent with the advertised feed.
        for change in &changes {
            if change.removed {
                state.infos.remove(&change.file_id);
                state.contents.remove(&change.file_id);
            } else if let Some(info) = &change.file {
                state.infos.insert(info.id.clone(), info.clone());
            }
        }
        state.batches.push_back(ChangeBatch {
            changes,
            new_token: new_token.parse().unwrap(),
        });
    }

    pub fn set_content(&self, id: &str, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state
            .contents
            .insert(id.parse().unwrap(), content.to_vec());
    }

    pub fn fail_downloads_of(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.failing_downloads.insert(fid(id));
    }

    pub fn allow_downloads_of(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.failing_downloads.remove(&fid(id));
    }
}

#[async_trait::async_trait]
impl IRemoteDrive for FakeDrive {
    async fn get_info(&self, id: &FileId) -> anyhow::Result<FileInfo> {
        let state = self.state.lock().unwrap();
        state
            .infos
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Drive API returned 404: {id} not found"))
    }

    async fn list_folder(&self, parent: &FileId) -> anyhow::Result<Vec<FileInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .infos
            .values()
            .filter(|info| !info.trashed && info.parents.contains(parent))
            .cloned()
            .collect())
    }

    async fn download_to(&self, id: &FileId, dest: &Path) -> anyhow::Result<()> {
        let content = {
            let mut state = self.state.lock().unwrap();
            if state.failing_downloads.contains(id) {
                anyhow::bail!("Drive API returned 403: download quota exceeded for {id}");
            }
            *state.download_counts.entry(id.clone()).or_insert(0) += 1;
            state
                .contents
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Drive API returned 404: no content for {id}"))?
        };
        tokio::fs::write(dest, content).await?;
        Ok(())
    }

    async fn create_file(
        &self,
        new: &NewFile,
        body: Option<Vec<u8>>,
    ) -> anyhow::Result<FileInfo> {
        let mut state = self.state.lock().unwrap();
        state.next_generated += 1;
        let id: FileId = format!("gen-{}", state.next_generated).parse().unwrap();

        let info = FileInfo {
            id: id.clone(),
            name: new.name.clone(),
            mime_type: new
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            md5_checksum: body.as_ref().map(|b| format!("{:x}", md5::compute(b))),
            size: body.as_ref().map(|b| b.len() as u64),
            modified_time: Utc::now(),
            parents: new.parents.clone(),
            trashed: false,
        };

        if let Some(bytes) = &body {
            state.contents.insert(id.clone(), bytes.clone());
        }
        state.infos.insert(id.clone(), info.clone());
        state.created.push((new.clone(), body));
        Ok(info)
    }

    async fn update_file(&self, id: &FileId, body: Vec<u8>) -> anyhow::Result<FileInfo> {
        let mut state = self.state.lock().unwrap();
        let mut info = state
            .infos
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Drive API returned 404: {id} not found"))?;

        info.md5_checksum = Some(format!("{:x}", md5::compute(&body)));
        info.size = Some(body.len() as u64);
        info.modified_time = Utc::now();

        state.contents.insert(id.clone(), body);
        state.infos.insert(id.clone(), info.clone());
        state.updated.push(id.clone());
        Ok(info)
    }

    async fn delete_file(&self, id: &FileId) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.infos.remove(id);
        state.contents.remove(id);
        state.deleted.push(id.clone());
        Ok(())
    }

    async fn changes_start_token(&self) -> anyhow::Result<ChangeToken> {
        Ok(self.start_token.parse().unwrap())
    }

    async fn changes_list(&self, token: &ChangeToken) -> anyhow::Result<ChangeBatch> {
        let mut state = self.state.lock().unwrap();
        state.changes_list_calls += 1;
        Ok(state.batches.pop_front().unwrap_or_else(|| ChangeBatch {
            changes: Vec::new(),
            new_token: token.clone(),
        }))
    }
}

// ============================================================================
// FakeStore
// ============================================================================

#[derive(Default)]
pub struct FakeStore {
    pub docs: Mutex<HashMap<String, SyncState>>,
    pub save_count: AtomicU32,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self, account_id: &str) -> Option<SyncState> {
        self.docs.lock().unwrap().get(account_id).cloned()
    }
}

#[async_trait::async_trait]
impl IStateStore for FakeStore {
    async fn load(&self, account_id: &str) -> anyhow::Result<Option<SyncState>> {
        Ok(self.docs.lock().unwrap().get(account_id).cloned())
    }

    async fn save(&self, account_id: &str, state: &SyncState) -> anyhow::Result<()> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        self.docs
            .lock()
            .unwrap()
            .insert(account_id.to_string(), state.clone());
        Ok(())
    }
}

// ============================================================================
// RecordingNotifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.messages.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl IStatusNotifier for RecordingNotifier {
    async fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
