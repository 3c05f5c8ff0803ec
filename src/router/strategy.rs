//! Caching strategies applied to matched requests.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::cache::HttpCache;
use super::fetch::Fetcher;
use super::http::{Request, Response};
use crate::error::FetchError;

/// How a matched request is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
  /// Serve from cache when present, otherwise fetch and store.
  CacheFirst { cache: String },
  /// Serve from cache immediately and refresh in the background.
  StaleWhileRevalidate { cache: String },
  /// Prefer the network, bounded by `timeout`, falling back to cache.
  NetworkFirst { cache: String, timeout: Duration },
  /// Network only, with the precached offline page on failure.
  NavigationFallback { offline_url: String },
}

/// What a strategy needs to run.
#[derive(Clone)]
pub(crate) struct Env {
  pub fetcher: Arc<dyn Fetcher>,
  pub cache: Arc<HttpCache>,
  /// Partition holding the current precache, once installed
  pub precache: Option<String>,
}

impl Strategy {
  pub fn cache_name(&self) -> Option<&str> {
    match self {
      Strategy::CacheFirst { cache }
      | Strategy::StaleWhileRevalidate { cache }
      | Strategy::NetworkFirst { cache, .. } => Some(cache),
      Strategy::NavigationFallback { .. } => None,
    }
  }

  pub(crate) async fn apply(&self, request: Request, env: &Env) -> Result<Response, FetchError> {
    match self {
      Strategy::CacheFirst { cache } => cache_first(cache, request, env).await,
      Strategy::StaleWhileRevalidate { cache } => stale_while_revalidate(cache, request, env).await,
      Strategy::NetworkFirst { cache, timeout } => {
        network_first(cache, *timeout, request, env).await
      }
      Strategy::NavigationFallback { offline_url } => {
        navigation_fallback(offline_url, request, env).await
      }
    }
  }
}

async fn cache_first(cache: &str, request: Request, env: &Env) -> Result<Response, FetchError> {
  let key = request.cache_key();
  if let Some(hit) = env.cache.get(cache, &key) {
    debug!(cache, %key, "cache hit");
    return Ok(hit);
  }

  let response = env.fetcher.fetch(&request).await?;
  env.cache.put(cache, &key, response.clone());
  Ok(response)
}

async fn stale_while_revalidate(
  cache: &str,
  request: Request,
  env: &Env,
) -> Result<Response, FetchError> {
  let key = request.cache_key();
  let Some(hit) = env.cache.get(cache, &key) else {
    let response = env.fetcher.fetch(&request).await?;
    env.cache.put(cache, &key, response.clone());
    return Ok(response);
  };

  debug!(cache, %key, "serving cached copy, revalidating");
  let fetcher = Arc::clone(&env.fetcher);
  let store = Arc::clone(&env.cache);
  let cache = cache.to_string();
  tokio::spawn(async move {
    match fetcher.fetch(&request).await {
      Ok(response) => {
        store.put(&cache, &key, response);
      }
      Err(e) => debug!(%key, "background revalidation failed: {}", e),
    }
  });

  Ok(hit)
}

async fn network_first(
  cache: &str,
  timeout: Duration,
  request: Request,
  env: &Env,
) -> Result<Response, FetchError> {
  let key = request.cache_key();

  // Runs to completion even after the timeout so a late response still refreshes the cache.
  let fetcher = Arc::clone(&env.fetcher);
  let store = Arc::clone(&env.cache);
  let partition = cache.to_string();
  let task_key = key.clone();
  let mut network = tokio::spawn(async move {
    let response = fetcher.fetch(&request).await?;
    store.put(&partition, &task_key, response.clone());
    Ok::<_, FetchError>(response)
  });

  let err = match tokio::time::timeout(timeout, &mut network).await {
    Ok(Ok(Ok(response))) => return Ok(response),
    Ok(Ok(Err(err))) => err,
    Ok(Err(join_err)) => FetchError::Network(join_err.to_string()),
    Err(_) => FetchError::Timeout(timeout),
  };

  match env.cache.get(cache, &key) {
    Some(cached) => {
      warn!(cache, %key, "network unavailable ({}), serving cached response", err);
      Ok(cached)
    }
    None => Err(err),
  }
}

async fn navigation_fallback(
  offline_url: &str,
  request: Request,
  env: &Env,
) -> Result<Response, FetchError> {
  match env.fetcher.fetch(&request).await {
    Ok(response) => Ok(response),
    Err(err) => {
      let offline = env
        .precache
        .as_deref()
        .and_then(|precache| env.cache.get(precache, offline_url));
      match offline {
        Some(page) => {
          warn!(url = %request.url, "navigation failed ({}), serving offline page", err);
          Ok(page)
        }
        None => Err(err),
      }
    }
  }
}
