//! Domain model for remote-file metadata and persisted sync state.

pub mod errors;
pub mod file_info;
pub mod newtypes;
pub mod state;

pub use errors::DomainError;
pub use file_info::{no_change, Change, FileInfo};
pub use newtypes::{ChangeToken, FileId};
pub use state::SyncState;
