//! Reconfiguration: the coordinator that rebuilds and publishes snapshots,
//! and the configuration sources that feed it.

mod coordinator;
mod watcher;

pub use coordinator::{
    Coordinator, CoordinatorHandle, Documents, ReconfigureEvent, ReloadError, ReloadSummary,
};
pub use watcher::{read_documents, DirectoryWatcher};
