//! Decoding of push message data into a displayable notification.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

const DEFAULT_TITLE: &str = "Story App Notification";
const DEFAULT_BODY: &str = "You have a new message!";
const DEFAULT_ICON: &str = "assets/images/icons/icon-192x192.png";
const DEFAULT_BADGE: &str = "assets/images/icons/icon-96x96.png";
const DEFAULT_URL: &str = "/index.html#/home";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Page opened when the notification is clicked
  pub url: String,
}

impl Default for NotificationPayload {
  fn default() -> Self {
    Self {
      title: DEFAULT_TITLE.into(),
      body: DEFAULT_BODY.into(),
      icon: DEFAULT_ICON.into(),
      badge: DEFAULT_BADGE.into(),
      url: DEFAULT_URL.into(),
    }
  }
}

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
  title: Option<String>,
  options: Option<RawOptions>,
  body: Option<String>,
  icon: Option<String>,
  badge: Option<String>,
  url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawOptions {
  body: Option<String>,
  icon: Option<String>,
  badge: Option<String>,
  data: Option<RawData>,
}

#[derive(Debug, Default, Deserialize)]
struct RawData {
  url: Option<String>,
}

/// Empty strings count as missing.
fn pick(value: Option<String>, fallback: String) -> String {
  value.filter(|v| !v.is_empty()).unwrap_or(fallback)
}

impl NotificationPayload {
  /// Accepts `{title, options: {body, icon, badge, data: {url}}}` or the flat
  /// `{title, body, icon, badge, url}` shape. Anything that is not a JSON
  /// object is shown as the body text.
  pub fn from_push_data(data: &[u8]) -> Self {
    let defaults = Self::default();
    if data.is_empty() {
      return defaults;
    }

    let raw = serde_json::from_slice::<Value>(data)
      .ok()
      .filter(Value::is_object)
      .and_then(|v| serde_json::from_value::<RawPayload>(v).ok());

    let Some(raw) = raw else {
      warn!("push data is not a JSON object, using it as the body");
      return Self {
        body: String::from_utf8_lossy(data).into_owned(),
        ..defaults
      };
    };

    let title = pick(raw.title, defaults.title);
    match raw.options {
      Some(options) => Self {
        title,
        body: pick(options.body, defaults.body),
        icon: pick(options.icon, defaults.icon),
        badge: pick(options.badge, defaults.badge),
        url: pick(options.data.and_then(|d| d.url), defaults.url),
      },
      None => Self {
        title,
        body: pick(raw.body, defaults.body),
        icon: pick(raw.icon, defaults.icon),
        badge: pick(raw.badge, defaults.badge),
        url: pick(raw.url, defaults.url),
      },
    }
  }

  /// Whether an open page at `page_url` should be focused and navigated
  /// instead of opening a new one. Fragments are ignored.
  pub fn targets_page(&self, page_url: &str) -> bool {
    let base = |url: &str| url.split('#').next().unwrap_or_default().to_string();
    base(page_url).ends_with(&base(&self.url))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_nested_options_shape() {
    let data = br#"{
      "title": "Story berhasil dibuat",
      "options": {
        "body": "Anda telah membuat story baru",
        "data": { "url": "/index.html#/detail/story-1" }
      }
    }"#;
    let payload = NotificationPayload::from_push_data(data);

    assert_eq!(payload.title, "Story berhasil dibuat");
    assert_eq!(payload.body, "Anda telah membuat story baru");
    assert_eq!(payload.icon, DEFAULT_ICON);
    assert_eq!(payload.url, "/index.html#/detail/story-1");
  }

  #[test]
  fn test_flat_shape() {
    let data = br#"{"title": "Hi", "body": "New story nearby", "badge": "b.png", "url": "/x"}"#;
    let payload = NotificationPayload::from_push_data(data);

    assert_eq!(payload.body, "New story nearby");
    assert_eq!(payload.badge, "b.png");
    assert_eq!(payload.url, "/x");
  }

  #[test]
  fn test_missing_and_empty_fields_take_defaults() {
    let payload = NotificationPayload::from_push_data(br#"{"title": "", "options": {}}"#);
    assert_eq!(payload, NotificationPayload::default());
    assert_eq!(NotificationPayload::from_push_data(b""), NotificationPayload::default());
  }

  #[test]
  fn test_plain_text_becomes_body() {
    let payload = NotificationPayload::from_push_data(b"server says hello");
    assert_eq!(payload.title, DEFAULT_TITLE);
    assert_eq!(payload.body, "server says hello");
  }

  #[test]
  fn test_targets_page_ignores_fragment() {
    let payload = NotificationPayload::default();
    assert!(payload.targets_page("https://app.example/index.html#/favorites"));
    assert!(!payload.targets_page("https://app.example/offline.html"));
  }
}
