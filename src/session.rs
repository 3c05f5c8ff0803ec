//! Session storage consumed by the API client and the sync coordinator.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::api::LoginResult;

/// The logged-in user's credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
  pub token: String,
  pub user_name: String,
  pub user_id: String,
}

impl From<LoginResult> for AuthSession {
  fn from(result: LoginResult) -> Self {
    Self {
      token: result.token,
      user_name: result.name,
      user_id: result.user_id,
    }
  }
}

/// Source of the current session. Cleared when the server rejects it.
pub trait SessionStore: Send + Sync {
  fn current(&self) -> Option<AuthSession>;

  fn save(&self, session: AuthSession);

  fn clear(&self);

  fn token(&self) -> Option<String> {
    self.current().map(|s| s.token)
  }

  fn is_logged_in(&self) -> bool {
    self.token().is_some()
  }
}

/// Session held only for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemorySession {
  inner: RwLock<Option<AuthSession>>,
}

impl MemorySession {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_session(session: AuthSession) -> Self {
    Self {
      inner: RwLock::new(Some(session)),
    }
  }
}

impl SessionStore for MemorySession {
  fn current(&self) -> Option<AuthSession> {
    self.inner.read().ok().and_then(|s| s.clone())
  }

  fn save(&self, session: AuthSession) {
    if let Ok(mut guard) = self.inner.write() {
      *guard = Some(session);
    }
  }

  fn clear(&self) {
    if let Ok(mut guard) = self.inner.write() {
      *guard = None;
    }
  }
}

/// Session persisted as JSON so it survives restarts.
///
/// An optional token override (from the environment) takes precedence over the
/// stored token without being written to disk.
#[derive(Debug)]
pub struct FileSession {
  path: PathBuf,
  cached: RwLock<Option<AuthSession>>,
  /// Dropped on `clear` so a rejected token is not sent again
  token_override: RwLock<Option<String>>,
}

impl FileSession {
  /// Open the session file at the default location.
  pub fn open(token_override: Option<String>) -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path, token_override)
  }

  pub fn open_at(path: &Path, token_override: Option<String>) -> Result<Self> {
    let cached = if path.exists() {
      let contents = std::fs::read_to_string(path)
        .map_err(|e| eyre!("Failed to read session file {}: {}", path.display(), e))?;
      match serde_json::from_str(&contents) {
        Ok(session) => Some(session),
        Err(e) => {
          warn!("ignoring unreadable session file {}: {}", path.display(), e);
          None
        }
      }
    } else {
      None
    };

    Ok(Self {
      path: path.to_path_buf(),
      cached: RwLock::new(cached),
      token_override: RwLock::new(token_override),
    })
  }

  fn default_path() -> Result<PathBuf> {
    Ok(crate::config::data_dir()?.join("session.json"))
  }

  fn persist(&self, session: Option<&AuthSession>) -> Result<()> {
    match session {
      Some(session) => {
        if let Some(parent) = self.path.parent() {
          std::fs::create_dir_all(parent)
            .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
        }
        let data = serde_json::to_vec_pretty(session)
          .map_err(|e| eyre!("Failed to serialize session: {}", e))?;
        std::fs::write(&self.path, data)
          .map_err(|e| eyre!("Failed to write session file {}: {}", self.path.display(), e))?;
      }
      None => {
        if self.path.exists() {
          std::fs::remove_file(&self.path)
            .map_err(|e| eyre!("Failed to remove session file {}: {}", self.path.display(), e))?;
        }
      }
    }
    Ok(())
  }
}

impl SessionStore for FileSession {
  fn current(&self) -> Option<AuthSession> {
    let stored = self.cached.read().ok().and_then(|s| s.clone());
    let token_override = self.token_override.read().ok().and_then(|t| t.clone());
    match (token_override, stored) {
      (Some(token), Some(session)) => Some(AuthSession { token, ..session }),
      (Some(token), None) => Some(AuthSession {
        token,
        user_name: String::new(),
        user_id: String::new(),
      }),
      (None, stored) => stored,
    }
  }

  fn save(&self, session: AuthSession) {
    if let Err(e) = self.persist(Some(&session)) {
      warn!("session kept in memory only: {:#}", e);
    }
    if let Ok(mut guard) = self.cached.write() {
      *guard = Some(session);
    }
    info!("session saved");
  }

  fn clear(&self) {
    if let Err(e) = self.persist(None) {
      warn!("failed to remove stored session: {:#}", e);
    }
    if let Ok(mut guard) = self.cached.write() {
      *guard = None;
    }
    if let Ok(mut guard) = self.token_override.write() {
      *guard = None;
    }
    info!("session cleared");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn session() -> AuthSession {
    AuthSession {
      token: "tok".into(),
      user_name: "Dimas".into(),
      user_id: "user-1".into(),
    }
  }

  #[test]
  fn test_memory_session_save_and_clear() {
    let store = MemorySession::new();
    assert!(!store.is_logged_in());

    store.save(session());
    assert_eq!(store.token().as_deref(), Some("tok"));

    store.clear();
    assert_eq!(store.current(), None);
  }

  #[test]
  fn test_file_session_survives_reopen() {
    let dir = std::env::temp_dir().join(format!("storyline-session-{}", std::process::id()));
    let path = dir.join("session.json");
    let _ = std::fs::remove_file(&path);

    let store = FileSession::open_at(&path, None).unwrap();
    store.save(session());

    let reopened = FileSession::open_at(&path, None).unwrap();
    assert_eq!(reopened.current(), Some(session()));

    reopened.clear();
    assert!(!path.exists());
    let _ = std::fs::remove_dir_all(&dir);
  }

  #[test]
  fn test_token_override_wins() {
    let path = std::env::temp_dir().join("storyline-session-missing.json");
    let store = FileSession::open_at(&path, Some("env-token".into())).unwrap();
    assert_eq!(store.token().as_deref(), Some("env-token"));
  }

  #[test]
  fn test_clear_drops_token_override() {
    let dir = std::env::temp_dir().join(format!("storyline-override-{}", std::process::id()));
    let path = dir.join("session.json");
    let store = FileSession::open_at(&path, Some("env-token".into())).unwrap();
    store.save(session());
    assert_eq!(store.token().as_deref(), Some("env-token"));

    store.clear();

    assert!(!store.is_logged_in());
    assert_eq!(store.current(), None);
    let _ = std::fs::remove_dir_all(&dir);
  }

  #[test]
  fn test_login_result_converts() {
    let result = LoginResult {
      user_id: "user-1".into(),
      name: "Dimas".into(),
      token: "tok".into(),
    };
    assert_eq!(AuthSession::from(result), session());
  }
}
