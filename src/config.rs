use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub push: PushConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub router: RouterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  /// Transport timeout for API calls
  pub timeout_secs: u64,
  /// Stories requested per feed page
  pub page_size: u32,
  pub endpoints: Endpoints,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "https://story-api.dicoding.dev/v1".to_string(),
      timeout_secs: 30,
      page_size: 10,
      endpoints: Endpoints::default(),
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

/// Endpoint paths relative to `base_url`.
///
/// Push subscribe and unsubscribe are configured separately; one is never
/// derived from the other.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
  pub register: String,
  pub login: String,
  pub stories: String,
  pub stories_guest: String,
  pub push_subscribe: String,
  pub push_unsubscribe: String,
}

impl Default for Endpoints {
  fn default() -> Self {
    Self {
      register: "register".to_string(),
      login: "login".to_string(),
      stories: "stories".to_string(),
      stories_guest: "stories/guest".to_string(),
      push_subscribe: "notifications/subscribe".to_string(),
      push_unsubscribe: "notifications/unsubscribe".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushConfig {
  /// VAPID application server key, base64url encoded
  pub vapid_public_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// Override for the local story database location
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
  /// Host whose GET traffic uses the network-first strategy
  pub api_host: String,
  pub network_timeout_secs: u64,
  pub offline_page: String,
}

impl Default for RouterConfig {
  fn default() -> Self {
    Self {
      api_host: "story-api.dicoding.dev".to_string(),
      network_timeout_secs: 10,
      offline_page: "/offline.html".to_string(),
    }
  }
}

impl RouterConfig {
  pub fn network_timeout(&self) -> Duration {
    Duration::from_secs(self.network_timeout_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./storyline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storyline/config.yaml
  ///
  /// Falls back to built-in defaults when nothing is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => {
        info!("no config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("storyline.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storyline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Session token override from the environment.
  ///
  /// Checks STORYLINE_TOKEN.
  pub fn token_override() -> Option<String> {
    std::env::var("STORYLINE_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

/// Per-user data directory holding the database, session and logs.
pub fn data_dir() -> Result<PathBuf> {
  let base = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(base.join("storyline"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_yaml_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.api.base_url, "https://story-api.dicoding.dev/v1");
    assert_eq!(config.api.page_size, 10);
    assert_eq!(config.router.network_timeout(), Duration::from_secs(10));
    assert_eq!(config.push.vapid_public_key, None);
    assert_ne!(
      config.api.endpoints.push_unsubscribe,
      config.api.endpoints.push_subscribe
    );
  }

  #[test]
  fn test_partial_override() {
    let yaml = r#"
api:
  base_url: http://localhost:8080/v1
  endpoints:
    push_unsubscribe: push/remove
router:
  api_host: localhost
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.api.base_url, "http://localhost:8080/v1");
    assert_eq!(config.api.timeout_secs, 30);
    assert_eq!(config.api.endpoints.push_subscribe, "notifications/subscribe");
    assert_eq!(config.api.endpoints.push_unsubscribe, "push/remove");
    assert_eq!(config.router.api_host, "localhost");
    assert_eq!(config.router.offline_page, "/offline.html");
  }

  #[test]
  fn test_data_dir_is_app_specific() {
    assert!(data_dir().unwrap().ends_with("storyline"));
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Config::load(Some(Path::new("/nonexistent/storyline.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
