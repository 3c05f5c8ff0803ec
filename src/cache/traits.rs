//! Provenance types returned with every read.

use std::fmt;

/// Result of a read, including where the data came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: Source,
}

impl<T> Sourced<T> {
  /// Data fetched from the network during this read.
  pub fn live(data: T) -> Self {
    Self {
      data,
      source: Source::Live,
    }
  }

  /// Data served from local storage or the in-memory buffer.
  pub fn cached(data: T) -> Self {
    Self {
      data,
      source: Source::Cached,
    }
  }

  pub fn is_live(&self) -> bool {
    self.source == Source::Live
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
    Sourced {
      data: f(self.data),
      source: self.source,
    }
  }
}

/// Indicates where data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
  /// Fresh data from the network
  Live,
  /// Network unavailable, serving local data
  Cached,
}

impl Source {
  pub fn as_str(self) -> &'static str {
    match self {
      Source::Live => "live",
      Source::Cached => "cached",
    }
  }
}

impl fmt::Display for Source {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
