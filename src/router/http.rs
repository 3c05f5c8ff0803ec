//! Minimal request/response model seen by the intercept layer.

use bytes::Bytes;
use reqwest::Method;
use url::Url;

/// What kind of resource the request is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  #[default]
  Other,
  Document,
  Image,
  Font,
  Script,
  Style,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  #[default]
  Cors,
  NoCors,
  SameOrigin,
  /// Top-level page navigation
  Navigate,
}

#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub mode: RequestMode,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      destination: Destination::Other,
      mode: RequestMode::Cors,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Cache key: the URL without its fragment.
  pub fn cache_key(&self) -> String {
    cache_key(&self.url)
  }
}

pub fn cache_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  /// HTTP status; 0 for an opaque cross-origin response
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn ok(body: impl Into<Bytes>) -> Self {
    Self::new(200, body)
  }

  /// A cross-origin response whose status and body are hidden.
  pub fn opaque() -> Self {
    Self::new(0, Bytes::new())
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Only opaque and 200 responses may be stored.
  pub fn is_cacheable(&self) -> bool {
    matches!(self.status, 0 | 200)
  }

  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
