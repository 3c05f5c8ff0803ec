//! Local story persistence for offline support.
//!
//! This module provides:
//! - A durable store with a recent-feed collection and a favorites collection
//! - Provenance markers telling callers whether data is live or cached

mod storage;
mod traits;

pub use storage::{SqliteStoryStore, StoryStore};
pub use traits::{Source, Sourced};

#[cfg(test)]
pub(crate) use storage::tests::story as sample_story;
