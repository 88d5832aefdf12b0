//! Synchronization engine
//!
//! [`SyncEngine`] owns the lifecycle: load (or initialize) the persisted
//! state, run the first-time bootstrap, then keep a change loop polling
//! the remote feed while debounced local events flow through the work
//! queue. Bootstrap and the change loop are mutually exclusive via the
//! `syncing` flag; all mutation funnels through the [`SyncCore`] mutex.
//!
//! ## Crash safety
//!
//! A fetched change batch is buffered into the state document *before*
//! the cursor advance is persisted, and the buffer shrinks as changes are
//! applied. A crash mid-batch therefore resumes with exactly the
//! unapplied suffix, before anything new is fetched.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gdsync_core::config::Config;
use gdsync_core::domain::{FileId, FileInfo, SyncState};
use gdsync_core::ports::{IRemoteDrive, IStateStore, IStatusNotifier};

use crate::queue::WorkQueue;
use crate::reconciler::{DownloadOutcome, LocalRootRemoved, StateSaveFailed, SyncCore};
use crate::watcher::{LocalWatcher, PathEvent};

/// Bidirectional synchronization engine for one account.
///
/// Cheap to clone; every clone drives the same underlying core.
#[derive(Clone)]
pub struct SyncEngine {
    core: Arc<Mutex<SyncCore>>,
    cancel: CancellationToken,
    local_root: PathBuf,
    poll_interval: Duration,
    debounce: Duration,
}

impl SyncEngine {
    /// Loads the persisted state for the configured account, or
    /// initializes a fresh one by resolving the remote root and acquiring
    /// a change-feed cursor.
    ///
    /// # Errors
    /// State store failures are fatal here; so is an unreachable remote
    /// on first run.
    pub async fn new(
        remote: Arc<dyn IRemoteDrive>,
        store: Arc<dyn IStateStore>,
        notifier: Arc<dyn IStatusNotifier>,
        config: &Config,
    ) -> Result<Self> {
        let account_id = config.remote.account_id.clone();
        let local_root = config.sync.root.clone();

        let state = match store.load(&account_id).await? {
            Some(state) => {
                info!(
                    account_id = %account_id,
                    entities = state.file_info.len(),
                    synced = state.synced,
                    "Resuming from persisted state"
                );
                state
            }
            None => {
                let root_ref = match &config.remote.root_folder_id {
                    Some(id) => FileId::new(id.clone())?,
                    None => FileId::new("root".to_string())?,
                };
                let root_info = remote
                    .get_info(&root_ref)
                    .await
                    .context("Failed to resolve the remote root folder")?;
                let token = remote
                    .changes_start_token()
                    .await
                    .context("Failed to acquire the initial change token")?;

                info!(account_id = %account_id, root_id = %root_info.id, "Initialized fresh state");
                let mut state = SyncState::new(&account_id, root_info.id.clone(), token);
                state.file_info.insert(root_info.id.clone(), root_info);
                state
            }
        };

        let core = SyncCore::new(remote, store, notifier, local_root.clone(), state);

        Ok(Self {
            core: Arc::new(Mutex::new(core)),
            cancel: CancellationToken::new(),
            local_root,
            poll_interval: Duration::from_secs(config.sync.poll_interval),
            debounce: Duration::from_secs(config.sync.debounce_delay),
        })
    }

    /// Token observed by every loop; cancelling it shuts the engine down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests a graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Current state document (for inspection and tests).
    pub async fn state_snapshot(&self) -> SyncState {
        self.core.lock().await.snapshot()
    }

    // ========================================================================
    // Bootstrap
    // ========================================================================

    /// First-run full download. No-op once `synced` is set.
    ///
    /// The change cursor is acquired *before* the listing begins, so
    /// remote edits racing the bootstrap surface in the first change-loop
    /// cycle instead of being lost.
    pub async fn bootstrap(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        if core.synced {
            debug!("Already synced, skipping bootstrap");
            return Ok(());
        }

        core.syncing = true;
        let result = Self::bootstrap_inner(&mut core).await;
        // The flag clears on every exit path; a failed bootstrap must not
        // wedge the change loop forever.
        core.syncing = false;
        result
    }

    async fn bootstrap_inner(core: &mut SyncCore) -> Result<()> {
        core.notifier
            .notify("Watching changes in the remote folder...")
            .await;
        core.change_token = core
            .remote
            .changes_start_token()
            .await
            .context("Failed to acquire change token")?;

        core.notifier.notify("Getting files info...").await;

        // Refresh the root's own metadata, then walk the structure.
        let root_id = core.cache.root_id().clone();
        core.get_info(&root_id, true).await?;

        let mut folders = vec![root_id.clone()];
        while let Some(folder_id) = folders.pop() {
            let children = core
                .remote
                .list_folder(&folder_id)
                .await
                .with_context(|| format!("Listing of folder {folder_id}"))?;
            for child in children {
                if child.is_folder() {
                    folders.push(child.id.clone());
                }
                core.cache.store_info(child);
            }
        }

        let mut folder_infos: Vec<FileInfo> = Vec::new();
        let mut file_infos: Vec<FileInfo> = Vec::new();
        for entity in core.cache.all_infos() {
            if entity.id == root_id {
                continue;
            }
            if entity.is_folder() {
                folder_infos.push(entity.clone());
            } else {
                file_infos.push(entity.clone());
            }
        }

        // Directories first so file downloads find their parents.
        for folder in &folder_infos {
            core.download(folder).await?;
        }

        let mut downloaded = 0u32;
        let mut ignored = 0u32;
        for file in &file_infos {
            match core.download(file).await? {
                DownloadOutcome::Downloaded => downloaded += 1,
                DownloadOutcome::Ignored => ignored += 1,
                _ => continue,
            }
            core.notifier
                .notify(&format!(
                    "{downloaded} files downloaded, {ignored} files ignored..."
                ))
                .await;
        }

        core.synced = true;
        core.save().await?;
        core.notifier
            .notify(&format!(
                "All done! {downloaded} files downloaded and {ignored} ignored."
            ))
            .await;
        info!(downloaded, ignored, "Bootstrap complete");
        Ok(())
    }

    // ========================================================================
    // Change loop
    // ========================================================================

    /// One change-loop cycle: drain any crash-buffered batch, otherwise
    /// fetch a new one, then apply head-first, saving after every change
    /// that produced an effect.
    ///
    /// Returns the number of changes applied. A remote failure abandons
    /// the failing change (it stays at the buffer head for the next
    /// cycle); a state-store failure propagates as fatal.
    pub async fn poll_changes_once(&self) -> Result<usize> {
        let mut core = self.core.lock().await;
        if !core.synced || core.syncing {
            return Ok(0);
        }

        let buffered = core.changes_to_execute.as_ref().map_or(0, |q| q.len());
        if buffered == 0 {
            let token = core.change_token.clone();
            let batch = core
                .remote
                .changes_list(&token)
                .await
                .context("Change feed fetch failed")?;

            if batch.changes.is_empty() {
                if batch.new_token != core.change_token {
                    core.change_token = batch.new_token;
                    core.save().await?;
                }
                return Ok(0);
            }

            debug!(fetched = batch.changes.len(), "Change feed drained");
            // Buffer before the cursor advance is persisted; a crash here
            // must never lose events.
            core.changes_to_execute = Some(batch.changes.into());
            core.change_token = batch.new_token;
            core.save().await?;
        } else {
            info!(buffered, "Resuming buffered change batch");
        }

        let mut applied = 0usize;
        while let Some(change) = core.peek_change() {
            if self.cancel.is_cancelled() {
                core.save().await?;
                return Ok(applied);
            }

            match core.apply_remote_change(&change).await {
                Ok(effect) => {
                    core.pop_change();
                    applied += 1;
                    if effect {
                        core.save().await?;
                    }
                }
                Err(err) => {
                    // Abandon the action; the change stays at the head so
                    // the next cycle retries it.
                    core.notifier.notify(&format!("Sync error: {err:#}")).await;
                    warn!(
                        file_id = %change.file_id,
                        error = %err,
                        "Change application failed"
                    );
                    return Ok(applied);
                }
            }
        }

        core.changes_to_execute = None;
        core.save().await?;
        Ok(applied)
    }

    /// Applies one debounced local event through the reconciler.
    pub async fn apply_local_event(&self, event: PathEvent) -> Result<()> {
        let mut core = self.core.lock().await;
        core.dispatch_local_event(&event).await
    }

    /// Queue-thunk wrapper around [`apply_local_event`]: classifies
    /// failures per the error design (fatal flags vs. dropped events).
    ///
    /// [`apply_local_event`]: SyncEngine::apply_local_event
    async fn react_to_local_event(&self, event: PathEvent) {
        debug!(?event, "Local event");
        if let Err(err) = self.apply_local_event(event).await {
            if err.downcast_ref::<LocalRootRemoved>().is_some() {
                error!("Local root was removed, stopping engine");
                self.cancel.cancel();
            } else if err.downcast_ref::<StateSaveFailed>().is_some() {
                error!(error = %err, "State store failure, stopping engine");
                self.cancel.cancel();
            } else {
                // Local-event reactions are best-effort: drop the event.
                warn!(error = %err, "Local event dropped");
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Runs the full engine until the cancellation token fires: watcher,
    /// bootstrap if needed, work queue, and the continuous change loop.
    /// Attempts a final save on the way out.
    pub async fn start(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.local_root)
            .await
            .with_context(|| format!("Failed to create {}", self.local_root.display()))?;

        let (mut watcher, mut events) = LocalWatcher::new(self.debounce)?;
        {
            let mut core = self.core.lock().await;
            core.set_ignorer(watcher.ignore_handle());
        }
        watcher.watch(&self.local_root)?;

        self.bootstrap().await?;
        watcher.mark_ready();

        let (queue, runner) = WorkQueue::new();
        let runner_handle = tokio::spawn(runner.run(self.cancel.clone()));

        // Pump debounced local events onto the serial queue.
        let pump_engine = self.clone();
        let pump_cancel = self.cancel.clone();
        let pump_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => {
                            let engine = pump_engine.clone();
                            queue.push(async move {
                                engine.react_to_local_event(event).await;
                            });
                        }
                        None => break,
                    },
                    _ = pump_cancel.cancelled() => break,
                }
            }
        });

        info!(
            poll_secs = self.poll_interval.as_secs(),
            "Change loop running"
        );
        while !self.cancel.is_cancelled() {
            match self.poll_changes_once().await {
                Ok(applied) if applied > 0 => info!(applied, "Applied remote changes"),
                Ok(_) => {}
                Err(err) => {
                    if err.downcast_ref::<StateSaveFailed>().is_some() {
                        error!(error = %err, "State store failure, stopping engine");
                        self.cancel.cancel();
                        break;
                    }
                    warn!(error = %err, "Change cycle failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        // Shutdown: close the watcher, let the queue drain its in-flight
        // thunk, then attempt a final save.
        drop(watcher);
        self.cancel.cancel();
        let _ = pump_handle.await;
        let _ = runner_handle.await;

        let core = self.core.lock().await;
        if let Err(err) = core.save().await {
            warn!(error = %err, "Final save failed");
        }
        info!("Engine stopped");
        Ok(())
    }
}
