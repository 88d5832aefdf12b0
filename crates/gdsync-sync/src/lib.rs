//! GDSync Sync - Bidirectional synchronization engine
//!
//! Keeps a local directory tree in sync with a remote drive account:
//!
//! 1. **Bootstrap**: first-run full download of the mirrored folder
//! 2. **Remote changes** (pull): drain the change feed, apply each change
//!    to the metadata cache, the disk, and the persisted state
//! 3. **Local changes** (push): debounced filesystem events are queued
//!    and reconciled against the remote
//!
//! ## Architecture
//!
//! ```text
//! change feed ──→ ChangeLoop ──┐
//!                              ├──→ SyncCore (single writer) ──→ cache + disk + state store
//! inotify ──→ LocalWatcher ──→ WorkQueue ──┘
//! ```
//!
//! All mutating work funnels through the [`SyncCore`] behind one mutex,
//! so reconciler actions never interleave. Every disk write the core
//! performs is preceded by an ignore marker on the watcher, which is how
//! self-induced events are kept out of the upload path.
//!
//! [`SyncCore`]: reconciler::SyncCore

pub mod cache;
pub mod engine;
pub mod queue;
pub mod reconciler;
pub mod watcher;

pub use engine::SyncEngine;
pub use watcher::{IgnoreHandle, LocalWatcher, PathEvent, PathEventKind};
