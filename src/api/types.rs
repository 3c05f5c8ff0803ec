use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A posted story. Immutable once created server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
  pub id: String,
  pub name: String,
  pub description: String,
  pub photo_url: String,
  #[serde(default)]
  pub lat: Option<f64>,
  #[serde(default)]
  pub lon: Option<f64>,
  pub created_at: DateTime<Utc>,
}

impl Story {
  pub fn has_location(&self) -> bool {
    self.lat.is_some() && self.lon.is_some()
  }
}

/// Which stories a listing should include.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LocationFilter {
  #[default]
  All,
  /// Only stories carrying coordinates
  WithCoordinates,
}

impl LocationFilter {
  pub fn as_query_value(self) -> &'static str {
    match self {
      LocationFilter::All => "0",
      LocationFilter::WithCoordinates => "1",
    }
  }
}

/// Photo attached to a new story.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
  pub bytes: Vec<u8>,
  pub file_name: String,
  pub mime_type: String,
}

/// A story to be submitted.
#[derive(Debug, Clone)]
pub struct NewStory {
  pub description: String,
  pub photo: PhotoUpload,
  pub lat: Option<f64>,
  pub lon: Option<f64>,
}

impl NewStory {
  /// Coordinates are only sent as a pair.
  pub fn coordinates(&self) -> Option<(f64, f64)> {
    match (self.lat, self.lon) {
      (Some(lat), Some(lon)) => Some((lat, lon)),
      _ => None,
    }
  }
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
  pub user_id: String,
  pub name: String,
  pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
  pub p256dh: String,
  pub auth: String,
}

/// A platform push subscription, keyed by its endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
  pub endpoint: String,
  pub keys: PushKeys,
}
