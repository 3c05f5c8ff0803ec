//! Serde-deserializable envelopes matching story API responses.
//!
//! Every response is a JSON object carrying `error` and `message` next to the
//! payload field, so envelopes are kept separate from the domain types.

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use super::types::{LoginResult, Story};

/// Re-read a JSON value as a typed envelope.
pub fn reserialize<T: DeserializeOwned>(value: Value) -> serde_json::Result<T> {
  serde_json::from_value(value)
}

// ============================================================================
// Common envelope fields
// ============================================================================

/// Extract the server-supplied error flag, if any.
pub fn error_flag(value: &Value) -> bool {
  value.get("error").and_then(Value::as_bool).unwrap_or(false)
}

/// Extract a non-empty server-supplied message, if any.
pub fn message(value: &Value) -> Option<&str> {
  value
    .get("message")
    .and_then(Value::as_str)
    .filter(|m| !m.trim().is_empty())
}

// ============================================================================
// Payload envelopes
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiLoginResponse {
  #[serde(rename = "loginResult")]
  pub login_result: LoginResult,
}

#[derive(Debug, Deserialize)]
pub struct ApiStoryListResponse {
  #[serde(rename = "listStory", default)]
  pub list_story: Vec<Story>,
}

#[derive(Debug, Deserialize)]
pub struct ApiStoryDetailResponse {
  pub story: Story,
}
