//! Named response caches with count and age based expiration.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::http::Response;

/// Eviction limits for one cache partition. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationPolicy {
  pub max_entries: Option<usize>,
  pub max_age: Option<Duration>,
}

impl ExpirationPolicy {
  pub const UNBOUNDED: ExpirationPolicy = ExpirationPolicy {
    max_entries: None,
    max_age: None,
  };

  pub fn new(max_entries: Option<usize>, max_age: Option<Duration>) -> Self {
    Self {
      max_entries,
      max_age,
    }
  }

  fn is_expired(&self, stored_at: Instant, now: Instant) -> bool {
    match self.max_age {
      Some(max_age) => now.saturating_duration_since(stored_at) > max_age,
      None => false,
    }
  }
}

#[derive(Debug, Clone)]
struct CachedEntry {
  response: Response,
  stored_at: Instant,
  last_used: Instant,
}

#[derive(Debug, Default)]
struct Partition {
  policy: ExpirationPolicy,
  entries: HashMap<String, CachedEntry>,
}

impl Partition {
  fn purge_expired(&mut self, now: Instant) {
    let policy = self.policy;
    self
      .entries
      .retain(|_, entry| !policy.is_expired(entry.stored_at, now));
  }

  fn evict_over_limit(&mut self) {
    let Some(max_entries) = self.policy.max_entries else {
      return;
    };
    while self.entries.len() > max_entries {
      let oldest = self
        .entries
        .iter()
        .min_by_key(|(_, entry)| entry.last_used)
        .map(|(key, _)| key.clone());
      match oldest {
        Some(key) => {
          debug!(%key, "evicting least recently used entry");
          self.entries.remove(&key);
        }
        None => break,
      }
    }
  }
}

/// All cache partitions of the intercept layer.
#[derive(Debug, Default)]
pub struct HttpCache {
  partitions: Mutex<HashMap<String, Partition>>,
}

impl HttpCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, Partition>> {
    self
      .partitions
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Set the expiration policy of a partition, creating it if needed.
  pub fn configure(&self, name: &str, policy: ExpirationPolicy) {
    let mut partitions = self.lock();
    let partition = partitions.entry(name.to_string()).or_default();
    partition.policy = policy;
    partition.purge_expired(Instant::now());
    partition.evict_over_limit();
  }

  /// Store a response. Returns false when the response is not cacheable.
  pub fn put(&self, name: &str, key: &str, response: Response) -> bool {
    if !response.is_cacheable() {
      debug!(cache = name, %key, status = response.status, "not caching response");
      return false;
    }

    let now = Instant::now();
    let mut partitions = self.lock();
    let partition = partitions.entry(name.to_string()).or_default();
    partition.entries.insert(
      key.to_string(),
      CachedEntry {
        response,
        stored_at: now,
        last_used: now,
      },
    );
    partition.purge_expired(now);
    partition.evict_over_limit();
    true
  }

  /// Look up a fresh entry. Expired entries are dropped and reported as a miss.
  pub fn get(&self, name: &str, key: &str) -> Option<Response> {
    let now = Instant::now();
    let mut partitions = self.lock();
    let partition = partitions.get_mut(name)?;
    let policy = partition.policy;

    match partition.entries.get_mut(key) {
      Some(entry) if !policy.is_expired(entry.stored_at, now) => {
        entry.last_used = now;
        return Some(entry.response.clone());
      }
      Some(_) => {}
      None => return None,
    }

    debug!(cache = name, %key, "cached entry expired");
    partition.entries.remove(key);
    None
  }

  pub fn contains(&self, name: &str, key: &str) -> bool {
    self
      .lock()
      .get(name)
      .map(|p| p.entries.contains_key(key))
      .unwrap_or(false)
  }

  pub fn len(&self, name: &str) -> usize {
    self.lock().get(name).map(|p| p.entries.len()).unwrap_or(0)
  }

  pub fn partition_names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.lock().keys().cloned().collect();
    names.sort();
    names
  }

  pub fn delete_partition(&self, name: &str) -> bool {
    let removed = self.lock().remove(name).is_some();
    if removed {
      warn!(cache = name, "cache partition deleted");
    }
    removed
  }
}
