//! Live/cached read policy over the story API and local store.

mod coordinator;

pub use coordinator::SyncCoordinator;
