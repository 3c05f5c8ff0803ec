//! Network intercept layer with per-resource caching strategies.
//!
//! Every outgoing request is classified by an ordered route table:
//! - precached app-shell assets are served from the precache partition
//! - third-party fonts and CDN scripts use cache-first with expiration
//! - images and map tiles use stale-while-revalidate
//! - story API GETs use network-first with a bounded wait
//! - navigations fall back to the precached offline page
//!
//! This layer shares no state with the sync coordinator.

mod cache;
mod fetch;
mod http;
mod strategy;

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::try_join_all;
use reqwest::Method;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

use crate::config::RouterConfig;
use crate::error::FetchError;

pub use cache::{ExpirationPolicy, HttpCache};
pub use fetch::{Fetcher, HttpFetcher};
pub use http::{Destination, Request, RequestMode, Response};
pub use strategy::Strategy;

use strategy::Env;

const PRECACHE_PREFIX: &str = "precache-";
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Which requests a route claims. Routes only ever claim GET requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatcher {
  Navigation,
  /// Exact origin match, e.g. `https://fonts.gstatic.com`
  Origins(Vec<String>),
  /// Image requests, or any request to a host containing one of the fragments
  ImagesOrHosts(Vec<String>),
  /// Exact host match
  Host(String),
}

impl RouteMatcher {
  pub fn matches(&self, request: &Request) -> bool {
    if request.method != Method::GET {
      return false;
    }
    match self {
      RouteMatcher::Navigation => request.is_navigation(),
      RouteMatcher::Origins(origins) => {
        let origin = request.url.origin().ascii_serialization();
        origins.iter().any(|o| *o == origin)
      }
      RouteMatcher::ImagesOrHosts(fragments) => {
        request.destination == Destination::Image
          || request
            .url
            .host_str()
            .map(|host| fragments.iter().any(|f| host.contains(f.as_str())))
            .unwrap_or(false)
      }
      RouteMatcher::Host(host) => request.url.host_str() == Some(host.as_str()),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Route {
  pub matcher: RouteMatcher,
  pub strategy: Strategy,
  pub expiration: ExpirationPolicy,
}

/// One app-shell asset to precache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheEntry {
  /// Absolute URL or path relative to the app origin
  pub url: String,
  pub revision: Option<String>,
}

impl PrecacheEntry {
  pub fn new(url: &str, revision: Option<&str>) -> Self {
    Self {
      url: url.to_string(),
      revision: revision.map(String::from),
    }
  }
}

#[derive(Debug, Clone)]
struct Precache {
  partition: String,
  urls: HashSet<String>,
}

/// Routes requests through caching strategies.
pub struct CacheRouter {
  origin: Url,
  routes: Vec<Route>,
  fetcher: Arc<dyn Fetcher>,
  cache: Arc<HttpCache>,
  precache: RwLock<Option<Precache>>,
}

impl CacheRouter {
  pub fn new(origin: Url, fetcher: Arc<dyn Fetcher>) -> Self {
    Self {
      origin,
      routes: Vec::new(),
      fetcher,
      cache: Arc::new(HttpCache::new()),
      precache: RwLock::new(None),
    }
  }

  /// The standard route table for the story app.
  pub fn standard(config: &RouterConfig, origin: Url, fetcher: Arc<dyn Fetcher>) -> Self {
    let offline_url = origin
      .join(&config.offline_page)
      .map(|u| http::cache_key(&u))
      .unwrap_or_else(|_| config.offline_page.clone());

    Self::new(origin, fetcher)
      .route(
        RouteMatcher::Navigation,
        Strategy::NavigationFallback { offline_url },
        ExpirationPolicy::UNBOUNDED,
      )
      .route(
        RouteMatcher::Origins(vec!["https://fonts.googleapis.com".into()]),
        Strategy::StaleWhileRevalidate {
          cache: "google-fonts-stylesheets".into(),
        },
        ExpirationPolicy::UNBOUNDED,
      )
      .route(
        RouteMatcher::Origins(vec!["https://fonts.gstatic.com".into()]),
        Strategy::CacheFirst {
          cache: "google-fonts-webfonts".into(),
        },
        ExpirationPolicy::new(Some(30), Some(DAY * 365)),
      )
      .route(
        RouteMatcher::Origins(vec![
          "https://unpkg.com".into(),
          "https://cdnjs.cloudflare.com".into(),
        ]),
        Strategy::CacheFirst {
          cache: "external-cdn-cache".into(),
        },
        ExpirationPolicy::new(None, Some(DAY * 30)),
      )
      .route(
        RouteMatcher::ImagesOrHosts(vec![
          "tile.openstreetmap.org".into(),
          "api.maptiler.com".into(),
        ]),
        Strategy::StaleWhileRevalidate {
          cache: "image-cache".into(),
        },
        ExpirationPolicy::new(Some(100), Some(DAY * 30)),
      )
      .route(
        RouteMatcher::Host(config.api_host.clone()),
        Strategy::NetworkFirst {
          cache: "story-api-cache".into(),
          timeout: config.network_timeout(),
        },
        ExpirationPolicy::new(Some(100), Some(DAY)),
      )
  }

  /// Append a route. Earlier routes win.
  pub fn route(
    mut self,
    matcher: RouteMatcher,
    strategy: Strategy,
    expiration: ExpirationPolicy,
  ) -> Self {
    if let Some(name) = strategy.cache_name() {
      self.cache.configure(name, expiration);
    }
    self.routes.push(Route {
      matcher,
      strategy,
      expiration,
    });
    self
  }

  pub fn cache(&self) -> &Arc<HttpCache> {
    &self.cache
  }

  /// Partition name of the installed precache, if any.
  pub fn precache_partition(&self) -> Option<String> {
    self
      .precache
      .read()
      .ok()
      .and_then(|p| p.as_ref().map(|p| p.partition.clone()))
  }

  /// Fetch and store every app-shell asset. Either all assets are stored or none are.
  pub async fn install(&self, manifest: &[PrecacheEntry]) -> Result<(), FetchError> {
    let partition = precache_name(manifest);
    let urls = manifest
      .iter()
      .map(|entry| {
        self
          .origin
          .join(&entry.url)
          .map_err(|e| FetchError::Network(format!("bad precache url {}: {}", entry.url, e)))
      })
      .collect::<Result<Vec<Url>, FetchError>>()?;

    let fetches = urls.iter().map(|url| async move {
      let response = self.fetcher.fetch(&Request::get(url.clone())).await?;
      if !response.is_ok() {
        return Err(FetchError::Network(format!(
          "precache of {} returned status {}",
          url, response.status
        )));
      }
      Ok::<_, FetchError>((http::cache_key(url), response))
    });
    let fetched = try_join_all(fetches).await?;

    self.cache.configure(&partition, ExpirationPolicy::UNBOUNDED);
    let mut keys = HashSet::new();
    for (key, response) in fetched {
      self.cache.put(&partition, &key, response);
      keys.insert(key);
    }

    info!(partition = %partition, "precached {} assets", keys.len());
    if let Ok(mut precache) = self.precache.write() {
      *precache = Some(Precache {
        partition,
        urls: keys,
      });
    }
    Ok(())
  }

  /// Remove precache partitions left by earlier versions. Returns how many were removed.
  pub fn activate(&self) -> usize {
    let current = self.precache_partition();
    let stale: Vec<String> = self
      .cache
      .partition_names()
      .into_iter()
      .filter(|name| name.starts_with(PRECACHE_PREFIX) && Some(name) != current.as_ref())
      .collect();

    for name in &stale {
      self.cache.delete_partition(name);
    }
    stale.len()
  }

  /// Answer a request the way the intercept layer would.
  pub async fn handle(&self, request: Request) -> Result<Response, FetchError> {
    if !matches!(request.url.scheme(), "http" | "https") {
      return Err(FetchError::Unrouted(request.url.to_string()));
    }

    let env = Env {
      fetcher: Arc::clone(&self.fetcher),
      cache: Arc::clone(&self.cache),
      precache: self.precache_partition(),
    };

    if request.method == Method::GET {
      if let Some(response) = self.serve_precached(&request).await? {
        return Ok(response);
      }
    }

    match self.routes.iter().find(|r| r.matcher.matches(&request)) {
      Some(route) => route.strategy.apply(request, &env).await,
      None => {
        debug!(url = %request.url, "unrouted request, going to network");
        self.fetcher.fetch(&request).await
      }
    }
  }

  async fn serve_precached(&self, request: &Request) -> Result<Option<Response>, FetchError> {
    let key = request.cache_key();
    let partition = match self.precache.read() {
      Ok(guard) => match guard.as_ref() {
        Some(p) if p.urls.contains(&key) => p.partition.clone(),
        _ => return Ok(None),
      },
      Err(_) => return Ok(None),
    };

    if let Some(hit) = self.cache.get(&partition, &key) {
      return Ok(Some(hit));
    }

    // Precached entry went missing; repopulate it.
    let response = self.fetcher.fetch(request).await?;
    self.cache.put(&partition, &key, response.clone());
    Ok(Some(response))
  }
}

/// Stable partition name derived from the manifest contents.
fn precache_name(manifest: &[PrecacheEntry]) -> String {
  let mut lines: Vec<String> = manifest
    .iter()
    .map(|e| format!("{}@{}", e.url, e.revision.as_deref().unwrap_or("")))
    .collect();
  lines.sort();

  let mut hasher = Sha256::new();
  for line in &lines {
    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }
  let digest = hex::encode(hasher.finalize());
  format!("{}{}", PRECACHE_PREFIX, &digest[..16])
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::collections::HashMap;
  use std::sync::Mutex;

  enum Reply {
    Respond(Response),
    Delayed(Duration, Response),
    Fail,
  }

  /// Fetcher answering from a script and recording every call.
  #[derive(Default)]
  struct ScriptedFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<String>>,
  }

  impl ScriptedFetcher {
    fn reply(&self, url: &str, reply: Reply) {
      self.replies.lock().unwrap().insert(url.to_string(), reply);
    }

    fn calls_to(&self, url: &str) -> usize {
      self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
  }

  #[async_trait]
  impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
      let key = request.cache_key();
      self.calls.lock().unwrap().push(key.clone());
      let reply = {
        let replies = self.replies.lock().unwrap();
        match replies.get(&key) {
          Some(Reply::Respond(r)) => Ok((None, r.clone())),
          Some(Reply::Delayed(d, r)) => Ok((Some(*d), r.clone())),
          Some(Reply::Fail) | None => Err(FetchError::Network(format!("offline: {}", key))),
        }
      };
      let (delay, response) = reply?;
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      Ok(response)
    }
  }

  const ORIGIN: &str = "https://app.example/";
  const API: &str = "https://story-api.dicoding.dev/v1/stories?page=1&size=10&location=1";

  fn router(fetcher: &Arc<ScriptedFetcher>) -> CacheRouter {
    CacheRouter::standard(
      &RouterConfig::default(),
      Url::parse(ORIGIN).unwrap(),
      fetcher.clone(),
    )
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_matchers_classify_requests() {
    let fonts = RouteMatcher::Origins(vec!["https://fonts.gstatic.com".into()]);
    assert!(fonts.matches(&get("https://fonts.gstatic.com/s/roboto.woff2")));
    assert!(!fonts.matches(&get("https://fonts.googleapis.com/css")));

    let images = RouteMatcher::ImagesOrHosts(vec!["tile.openstreetmap.org".into()]);
    assert!(images.matches(&get("https://a.tile.openstreetmap.org/1/2/3.png")));
    assert!(images.matches(
      &get("https://story-api.dicoding.dev/images/p.jpg").with_destination(Destination::Image)
    ));

    let api = RouteMatcher::Host("story-api.dicoding.dev".into());
    assert!(api.matches(&get(API)));
    assert!(!api.matches(&get(API).with_method(Method::POST)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_cache_first_populates_then_skips_network() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let font = "https://fonts.gstatic.com/s/roboto.woff2";
    fetcher.reply(font, Reply::Respond(Response::ok("font")));
    let router = router(&fetcher);

    assert_eq!(router.handle(get(font)).await.unwrap().body, "font");
    fetcher.reply(font, Reply::Fail);
    assert_eq!(router.handle(get(font)).await.unwrap().body, "font");
    assert_eq!(fetcher.calls_to(font), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cache_first_never_stores_errors() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let script = "https://unpkg.com/leaflet/dist/leaflet.js";
    fetcher.reply(script, Reply::Respond(Response::new(404, "missing")));
    let router = router(&fetcher);

    assert_eq!(router.handle(get(script)).await.unwrap().status, 404);
    router.handle(get(script)).await.unwrap();
    assert_eq!(fetcher.calls_to(script), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_while_revalidate_refreshes_in_background() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let tile = "https://a.tile.openstreetmap.org/13/6500/4200.png";
    fetcher.reply(tile, Reply::Respond(Response::ok("v1")));
    let router = router(&fetcher);

    assert_eq!(router.handle(get(tile)).await.unwrap().body, "v1");

    fetcher.reply(tile, Reply::Respond(Response::ok("v2")));
    assert_eq!(router.handle(get(tile)).await.unwrap().body, "v1");

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(router.handle(get(tile)).await.unwrap().body, "v2");
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_while_revalidate_first_request_waits_for_network() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let photo = "https://story-api.dicoding.dev/images/stories/p.jpg";
    let router = router(&fetcher);

    let request = get(photo).with_destination(Destination::Image);
    assert!(router.handle(request.clone()).await.is_err());

    fetcher.reply(photo, Reply::Respond(Response::opaque()));
    assert_eq!(router.handle(request).await.unwrap().status, 0);
    assert!(router.cache().contains("image-cache", photo));
  }

  #[tokio::test(start_paused = true)]
  async fn test_network_first_serves_cache_after_timeout() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.reply(API, Reply::Respond(Response::ok("old")));
    let router = router(&fetcher);
    assert_eq!(router.handle(get(API)).await.unwrap().body, "old");

    fetcher.reply(
      API,
      Reply::Delayed(Duration::from_secs(30), Response::ok("late")),
    );
    let response = router.handle(get(API)).await.unwrap();
    assert_eq!(response.body, "old");

    // The slow response still lands in the cache once it arrives.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
      router.cache().get("story-api-cache", API).unwrap().body,
      "late"
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_network_first_timeout_without_cache_fails() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.reply(
      API,
      Reply::Delayed(Duration::from_secs(30), Response::ok("late")),
    );
    let router = router(&fetcher);

    let err = router.handle(get(API)).await.unwrap_err();
    assert!(matches!(err, FetchError::Timeout(d) if d == Duration::from_secs(10)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_network_first_failure_falls_back_to_cache() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.reply(API, Reply::Respond(Response::ok("fresh")));
    let router = router(&fetcher);
    router.handle(get(API)).await.unwrap();

    fetcher.reply(API, Reply::Fail);
    assert_eq!(router.handle(get(API)).await.unwrap().body, "fresh");
  }

  #[tokio::test(start_paused = true)]
  async fn test_network_first_does_not_cache_server_errors() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.reply(API, Reply::Respond(Response::new(500, "down")));
    let router = router(&fetcher);

    assert_eq!(router.handle(get(API)).await.unwrap().status, 500);
    assert!(!router.cache().contains("story-api-cache", API));
  }

  #[tokio::test(start_paused = true)]
  async fn test_precache_serves_without_network_and_navigation_falls_back() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.reply("https://app.example/app.bundle.js", Reply::Respond(Response::ok("js")));
    fetcher.reply("https://app.example/offline.html", Reply::Respond(Response::ok("offline")));
    let router = router(&fetcher);

    router
      .install(&[
        PrecacheEntry::new("/app.bundle.js", Some("abc")),
        PrecacheEntry::new("/offline.html", Some("1")),
      ])
      .await
      .unwrap();

    fetcher.reply("https://app.example/app.bundle.js", Reply::Fail);
    let bundle = router.handle(get("https://app.example/app.bundle.js")).await.unwrap();
    assert_eq!(bundle.body, "js");
    assert_eq!(fetcher.calls_to("https://app.example/app.bundle.js"), 1);

    let page = Request::navigate(Url::parse("https://app.example/#/detail/s1").unwrap());
    let response = router.handle(page).await.unwrap();
    assert_eq!(response.body, "offline");
  }

  #[tokio::test(start_paused = true)]
  async fn test_navigation_without_precache_propagates_failure() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let router = router(&fetcher);

    let page = Request::navigate(Url::parse("https://app.example/").unwrap());
    assert!(matches!(router.handle(page).await, Err(FetchError::Network(_))));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_install_stores_nothing() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.reply("https://app.example/app.css", Reply::Respond(Response::ok("css")));
    let router = router(&fetcher);

    let result = router
      .install(&[
        PrecacheEntry::new("/app.css", None),
        PrecacheEntry::new("/missing.js", None),
      ])
      .await;

    assert!(result.is_err());
    assert_eq!(router.precache_partition(), None);
    assert!(router
      .cache()
      .partition_names()
      .iter()
      .all(|name| !name.starts_with(PRECACHE_PREFIX)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_activate_removes_stale_precache_versions() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.reply("https://app.example/index.html", Reply::Respond(Response::ok("v")));
    let router = router(&fetcher);

    router
      .install(&[PrecacheEntry::new("/index.html", Some("1"))])
      .await
      .unwrap();
    let old = router.precache_partition().unwrap();

    router
      .install(&[PrecacheEntry::new("/index.html", Some("2"))])
      .await
      .unwrap();
    let current = router.precache_partition().unwrap();
    assert_ne!(old, current);

    assert_eq!(router.activate(), 1);
    let names = router.cache().partition_names();
    assert!(names.contains(&current));
    assert!(!names.contains(&old));
  }

  #[tokio::test(start_paused = true)]
  async fn test_unrouted_requests_are_not_cached() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let url = "https://elsewhere.example/data.json";
    fetcher.reply(url, Reply::Respond(Response::ok("{}")));
    let router = router(&fetcher);

    router.handle(get(url)).await.unwrap();
    router.handle(get(url)).await.unwrap();
    assert_eq!(fetcher.calls_to(url), 2);
  }

  #[tokio::test]
  async fn test_non_http_requests_are_unrouted() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let router = router(&fetcher);

    let err = router.handle(get("data:text/plain,hello")).await.unwrap_err();
    assert!(matches!(err, FetchError::Unrouted(_)));
    assert!(fetcher.calls.lock().unwrap().is_empty());
  }

  #[test]
  fn test_precache_name_ignores_manifest_order() {
    let a = PrecacheEntry::new("/a.js", Some("1"));
    let b = PrecacheEntry::new("/b.js", Some("2"));
    assert_eq!(
      precache_name(&[a.clone(), b.clone()]),
      precache_name(&[b, a.clone()])
    );
    assert_ne!(
      precache_name(&[a]),
      precache_name(&[PrecacheEntry::new("/a.js", Some("3"))])
    );
  }
}
