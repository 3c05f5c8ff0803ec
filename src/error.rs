//! Error types shared across the story core.

use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the story API client and the sync coordinator.
#[derive(Debug, Error)]
pub enum StoryError {
  /// Transport-level failure (DNS, refused connection, timeout). Eligible for cache fallback.
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),

  /// The server answered but refused the request.
  #[error("{message} (status {status})")]
  Api { status: u16, message: String },

  /// No session token for a call that needs one, or the session was rejected.
  #[error("authentication required")]
  AuthRequired,

  /// No live data and nothing usable in the local cache.
  #[error("no live data and no cached copy available")]
  Unavailable,

  /// A favorite target could not be resolved by any path.
  #[error("story {0} not found")]
  NotFound(String),

  /// Local storage failed on a write the caller depends on.
  #[error("storage error: {0}")]
  Storage(String),

  /// The request could not be built (bad endpoint, missing field).
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  /// The response did not carry the expected payload.
  #[error("unexpected response: {0}")]
  Decode(String),
}

impl StoryError {
  /// Whether this error means the current session is missing or no longer accepted.
  pub fn is_session_invalid(&self) -> bool {
    matches!(
      self,
      StoryError::AuthRequired | StoryError::Api { status: 401, .. }
    )
  }

  pub(crate) fn storage(report: color_eyre::Report) -> Self {
    StoryError::Storage(format!("{:#}", report))
  }
}

/// Failures from the push subscription state machine.
#[derive(Debug, Error)]
pub enum PushError {
  #[error("push notifications are not supported on this platform")]
  Unsupported,

  #[error("notification permission is blocked")]
  PermissionDenied,

  #[error("another subscription change is already in progress")]
  Busy,

  #[error("cannot {action} while {state}")]
  InvalidState {
    action: &'static str,
    state: &'static str,
  },

  #[error("push service error: {0}")]
  Platform(String),

  #[error("server rejected subscription change: {0}")]
  Server(#[source] StoryError),

  /// One side of a two-phase change succeeded and the other did not.
  #[error("partial failure: {0}")]
  PartialFailure(String),
}

/// Failures from the HTTP caching router.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("network request failed: {0}")]
  Network(String),

  #[error("network did not respond within {0:?}")]
  Timeout(Duration),

  /// The request is outside what the intercept layer handles.
  #[error("request not routable: {0}")]
  Unrouted(String),
}

impl From<reqwest::Error> for FetchError {
  fn from(err: reqwest::Error) -> Self {
    FetchError::Network(err.to_string())
  }
}
