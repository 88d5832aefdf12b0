//! Local filesystem watcher with debounce and ignore suppression
//!
//! Wraps the `notify` crate to observe the local root recursively and
//! converts raw OS events into [`PathEvent`] values. Raw events are
//! coalesced per path: each event resets that path's quiet timer, and
//! only after the debounce window passes is the buffer collapsed into a
//! single emission.
//!
//! The reconciler calls [`IgnoreHandle::ignore`] immediately before every
//! disk write it performs. The marker lands in the same per-path buffer
//! as the self-induced OS events and causes the whole buffer to be
//! discarded at the next fire, so the engine never re-uploads its own
//! writes. The marker is scoped to one fire; later genuine edits pass
//! through.
//!
//! ## Architecture
//!
//! ```text
//! inotify ──→ LocalWatcher ──→ raw channel ──→ debounce task ──→ PathEvent stream
//!                                  ▲
//!                           IgnoreHandle (reconciler)
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// How long a path must stay quiet before its buffer is collapsed.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

// ============================================================================
// PathEvent
// ============================================================================

/// Kind of a collapsed filesystem event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathEventKind {
    /// A file appeared
    Add,
    /// A directory appeared
    AddDir,
    /// A file's content changed
    Change,
    /// A file disappeared
    Unlink,
    /// A directory disappeared
    UnlinkDir,
    /// Synthetic marker injected by the reconciler before its own writes
    Ignore,
}

impl PathEventKind {
    /// Structural events take precedence over `Change` when a buffer is
    /// collapsed.
    fn is_structural(self) -> bool {
        matches!(
            self,
            PathEventKind::Add
                | PathEventKind::AddDir
                | PathEventKind::Unlink
                | PathEventKind::UnlinkDir
        )
    }
}

/// One filesystem event for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEvent {
    pub kind: PathEventKind,
    pub path: PathBuf,
}

impl PathEvent {
    pub fn new(kind: PathEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

// ============================================================================
// Buffer collapse
// ============================================================================

/// Collapses a per-path event buffer into at most one emission.
///
/// Any ignore marker drops the path entirely. Otherwise the last
/// structural event wins; a buffer of pure content events yields its last
/// entry.
fn collapse(kinds: &[PathEventKind]) -> Option<PathEventKind> {
    if kinds.contains(&PathEventKind::Ignore) {
        return None;
    }
    kinds
        .iter()
        .rev()
        .copied()
        .find(|kind| kind.is_structural())
        .or_else(|| kinds.last().copied())
}

// ============================================================================
// IgnoreHandle
// ============================================================================

/// Cloneable handle the reconciler uses to suppress self-induced events.
#[derive(Clone)]
pub struct IgnoreHandle {
    raw_tx: mpsc::UnboundedSender<PathEvent>,
}

impl IgnoreHandle {
    /// Injects a synthetic ignore marker into the path's debounce buffer.
    ///
    /// Must be called immediately before the disk write it covers so the
    /// marker shares the debounce window with the write's OS events.
    pub fn ignore(&self, path: &Path) {
        debug!(path = %path.display(), "Ignore marker");
        let _ = self
            .raw_tx
            .send(PathEvent::new(PathEventKind::Ignore, path));
    }

    /// A handle wired to nothing, for contexts without a watcher.
    pub fn disconnected() -> Self {
        let (raw_tx, _raw_rx) = mpsc::unbounded_channel();
        Self { raw_tx }
    }
}

// ============================================================================
// LocalWatcher
// ============================================================================

/// Watches the local root recursively and emits debounced [`PathEvent`]s.
///
/// Raw events observed before [`mark_ready`](LocalWatcher::mark_ready) is
/// called are silently dropped; the initial materialization of the tree
/// must not look like user activity.
pub struct LocalWatcher {
    watcher: RecommendedWatcher,
    raw_tx: mpsc::UnboundedSender<PathEvent>,
    ready: Arc<AtomicBool>,
}

impl LocalWatcher {
    /// Creates the watcher and its debounced event stream.
    ///
    /// Spawns the debounce task on the current tokio runtime.
    pub fn new(debounce: Duration) -> Result<(Self, mpsc::UnboundedReceiver<PathEvent>)> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<PathEvent>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<PathEvent>();
        let ready = Arc::new(AtomicBool::new(false));

        let tx = raw_tx.clone();
        let gate = ready.clone();
        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if !gate.load(Ordering::Acquire) {
                        return;
                    }
                    for path_event in map_notify_event(&event) {
                        if tx.send(path_event).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        tokio::spawn(debounce_loop(raw_rx, out_tx, debounce));

        Ok((
            Self {
                watcher,
                raw_tx,
                ready,
            },
            out_rx,
        ))
    }

    /// Starts watching a directory tree recursively.
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "Starting recursive watch");
        self.watcher
            .watch(path, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", path.display()))
    }

    /// Opens the gate: events observed from now on are real.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
        info!("Watcher ready, local events flowing");
    }

    /// Handle for the reconciler's ignore markers.
    pub fn ignore_handle(&self) -> IgnoreHandle {
        IgnoreHandle {
            raw_tx: self.raw_tx.clone(),
        }
    }
}

// ============================================================================
// Debounce task
// ============================================================================

/// Deadline used when no buffer is pending. Far enough out to be "never";
/// re-armed whenever an event arrives.
const IDLE_PARK: Duration = Duration::from_secs(3600);

async fn debounce_loop(
    mut raw_rx: mpsc::UnboundedReceiver<PathEvent>,
    out_tx: mpsc::UnboundedSender<PathEvent>,
    window: Duration,
) {
    let mut pending: HashMap<PathBuf, (Vec<PathEventKind>, Instant)> = HashMap::new();

    loop {
        let next_deadline = pending
            .values()
            .map(|(_, deadline)| *deadline)
            .min()
            .unwrap_or_else(|| Instant::now() + IDLE_PARK);

        tokio::select! {
            event = raw_rx.recv() => match event {
                Some(event) => {
                    let entry = pending
                        .entry(event.path)
                        .or_insert_with(|| (Vec::new(), Instant::now() + window));
                    entry.0.push(event.kind);
                    // Every raw event restarts the quiet period.
                    entry.1 = Instant::now() + window;
                }
                None => break,
            },
            _ = tokio::time::sleep_until(next_deadline) => {
                let now = Instant::now();
                let due: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, (_, deadline))| *deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();

                for path in due {
                    let Some((kinds, _)) = pending.remove(&path) else {
                        continue;
                    };
                    match collapse(&kinds) {
                        Some(kind) => {
                            debug!(path = %path.display(), ?kind, "Debounced event");
                            if out_tx.send(PathEvent { kind, path }).is_err() {
                                return;
                            }
                        }
                        None => {
                            debug!(path = %path.display(), "Self-induced events discarded");
                        }
                    }
                }
            }
        }
    }

    // Channel closed: flush whatever settled semantics allow.
    for (path, (kinds, _)) in pending {
        if let Some(kind) = collapse(&kinds) {
            let _ = out_tx.send(PathEvent { kind, path });
        }
    }
    debug!("Debounce task stopped");
}

// ============================================================================
// Event mapping - notify::Event -> PathEvent
// ============================================================================

/// Converts a raw notify event into zero or more [`PathEvent`]s.
///
/// Renames surface as an unlink of the old path plus an add of the new
/// one; the engine has no first-class move for local events. Access
/// events are ignored.
fn map_notify_event(event: &notify::Event) -> Vec<PathEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(kind) => {
            let Some(path) = paths.first() else {
                return Vec::new();
            };
            let event_kind = match kind {
                CreateKind::Folder => PathEventKind::AddDir,
                CreateKind::File => PathEventKind::Add,
                _ => {
                    if path.is_dir() {
                        PathEventKind::AddDir
                    } else {
                        PathEventKind::Add
                    }
                }
            };
            vec![PathEvent::new(event_kind, path)]
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            let old = &paths[0];
            let new = &paths[1];
            let add_kind = if new.is_dir() {
                PathEventKind::AddDir
            } else {
                PathEventKind::Add
            };
            vec![
                PathEvent::new(PathEventKind::Unlink, old),
                PathEvent::new(add_kind, new),
            ]
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths
            .first()
            .map(|p| vec![PathEvent::new(PathEventKind::Unlink, p)])
            .unwrap_or_default(),

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
            .first()
            .map(|p| {
                let kind = if p.is_dir() {
                    PathEventKind::AddDir
                } else {
                    PathEventKind::Add
                };
                vec![PathEvent::new(kind, p)]
            })
            .unwrap_or_default(),

        EventKind::Modify(_) => paths
            .first()
            .map(|p| vec![PathEvent::new(PathEventKind::Change, p)])
            .unwrap_or_default(),

        EventKind::Remove(kind) => {
            let Some(path) = paths.first() else {
                return Vec::new();
            };
            let event_kind = match kind {
                RemoveKind::Folder => PathEventKind::UnlinkDir,
                _ => PathEventKind::Unlink,
            };
            vec![PathEvent::new(event_kind, path)]
        }

        _ => Vec::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================
