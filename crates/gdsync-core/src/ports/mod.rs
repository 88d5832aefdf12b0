//! Port definitions (hexagonal architecture)
//!
//! Traits at the seams of the engine: the remote drive API, the state
//! store, and the status notifier. Adapters live in sibling crates.

pub mod notifier;
pub mod remote_drive;
pub mod state_store;

pub use notifier::IStatusNotifier;
pub use remote_drive::{ChangeBatch, IRemoteDrive, NewFile};
pub use state_store::IStateStore;
