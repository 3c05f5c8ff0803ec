//! Read-path policy: live first, local cache as fallback, favorites on demand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::api::{LocationFilter, NewStory, RemoteStoryClient, Story};
use crate::cache::{Sourced, StoryStore};
use crate::error::StoryError;

/// Coordinates the remote client with local storage.
///
/// Reads try the network first and write through to the store; when the
/// network fails the store answers instead, tagged as cached. A rejected
/// session is never masked by cached data.
pub struct SyncCoordinator<S: StoryStore> {
  remote: RemoteStoryClient,
  store: Arc<S>,
  page_size: u32,
  /// Stories from the most recently rendered feed, by id
  last_seen: Arc<Mutex<HashMap<String, Story>>>,
}

impl<S: StoryStore> SyncCoordinator<S> {
  pub fn new(remote: RemoteStoryClient, store: Arc<S>) -> Self {
    Self {
      remote,
      store,
      page_size: 10,
      last_seen: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Set how many stories a feed load requests.
  pub fn with_page_size(mut self, page_size: u32) -> Self {
    self.page_size = page_size.max(1);
    self
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  /// Load the story feed (stories with coordinates).
  pub async fn load_feed(&self) -> Result<Sourced<Vec<Story>>, StoryError> {
    let result = self
      .remote
      .list_stories(1, self.page_size, LocationFilter::WithCoordinates)
      .await;

    match result {
      Ok(stories) => {
        self.write_through(&stories);
        self.remember_feed(&stories);
        info!("feed loaded live ({} stories)", stories.len());
        Ok(Sourced::live(stories))
      }
      Err(err) if err.is_session_invalid() => Err(self.session_lost(err)),
      Err(err) => {
        warn!("feed fetch failed, trying local cache: {}", err);
        let cached = self.store.get_all().unwrap_or_else(|e| {
          warn!("local cache read failed: {:#}", e);
          Vec::new()
        });

        if cached.is_empty() {
          return Err(StoryError::Unavailable);
        }

        self.remember_feed(&cached);
        info!("feed served from cache ({} stories)", cached.len());
        Ok(Sourced::cached(cached))
      }
    }
  }

  /// Load one story. Stories from the last rendered feed need no network round trip.
  pub async fn load_detail(&self, id: &str) -> Result<Sourced<Story>, StoryError> {
    if let Some(story) = self.recall(id) {
      debug!(id, "detail served from last-seen buffer");
      return Ok(Sourced::cached(story));
    }

    match self.remote.get_story_detail(id).await {
      Ok(story) => {
        self.write_through(std::slice::from_ref(&story));
        self.remember(story.clone());
        Ok(Sourced::live(story))
      }
      Err(err) if err.is_session_invalid() => Err(self.session_lost(err)),
      Err(err) => {
        warn!(id, "detail fetch failed, trying local cache: {}", err);
        match self.store.get_by_id(id) {
          Ok(Some(story)) => Ok(Sourced::cached(story)),
          Ok(None) => Err(StoryError::Unavailable),
          Err(e) => {
            warn!(id, "local cache read failed: {:#}", e);
            Err(StoryError::Unavailable)
          }
        }
      }
    }
  }

  /// Flip the favorite state of a story and return the new state.
  ///
  /// Requires a session. Adding resolves the full record from the last-seen
  /// buffer, then the local cache, then the server.
  pub async fn toggle_favorite(&self, id: &str) -> Result<bool, StoryError> {
    if !self.remote.session().is_logged_in() {
      return Err(StoryError::AuthRequired);
    }

    let favorited = self.store.is_favorite(id).map_err(StoryError::storage)?;
    if favorited {
      self
        .store
        .remove_favorite(id)
        .map_err(StoryError::storage)?;
      info!(id, "removed from favorites");
      return Ok(false);
    }

    let story = self.resolve(id).await?;
    self
      .store
      .add_favorite(&story)
      .map_err(StoryError::storage)?;
    info!(id, "added to favorites");
    Ok(true)
  }

  pub fn list_favorites(&self) -> Result<Vec<Story>, StoryError> {
    self.store.list_favorites().map_err(StoryError::storage)
  }

  pub fn is_favorite(&self, id: &str) -> Result<bool, StoryError> {
    self.store.is_favorite(id).map_err(StoryError::storage)
  }

  /// Forget the cached feed. Favorites are kept.
  pub fn clear_recent(&self) -> Result<(), StoryError> {
    self.store.clear_recent().map_err(StoryError::storage)?;
    if let Ok(mut seen) = self.last_seen.lock() {
      seen.clear();
    }
    Ok(())
  }

  /// Submit a story. Posts as guest when there is no session. Needs connectivity.
  pub async fn post_story(&self, story: &NewStory) -> Result<String, StoryError> {
    let as_guest = !self.remote.session().is_logged_in();
    self.remote.create_story(story, as_guest).await
  }

  async fn resolve(&self, id: &str) -> Result<Story, StoryError> {
    if let Some(story) = self.recall(id) {
      return Ok(story);
    }

    match self.store.get_by_id(id) {
      Ok(Some(story)) => return Ok(story),
      Ok(None) => {}
      Err(e) => warn!(id, "local cache read failed: {:#}", e),
    }

    match self.remote.get_story_detail(id).await {
      Ok(story) => {
        self.write_through(std::slice::from_ref(&story));
        Ok(story)
      }
      Err(err) if err.is_session_invalid() => Err(self.session_lost(err)),
      Err(err) => {
        warn!(id, "could not resolve story for favorites: {}", err);
        Err(StoryError::NotFound(id.to_string()))
      }
    }
  }

  /// Cache write failures degrade caching but never fail the read.
  fn write_through(&self, stories: &[Story]) {
    if let Err(e) = self.store.upsert_many(stories) {
      warn!("failed to cache {} stories: {:#}", stories.len(), e);
    }
  }

  fn session_lost(&self, err: StoryError) -> StoryError {
    warn!("session rejected, clearing: {}", err);
    self.remote.session().clear();
    StoryError::AuthRequired
  }

  fn remember_feed(&self, stories: &[Story]) {
    if let Ok(mut seen) = self.last_seen.lock() {
      seen.clear();
      seen.extend(stories.iter().map(|s| (s.id.clone(), s.clone())));
    }
  }

  fn remember(&self, story: Story) {
    if let Ok(mut seen) = self.last_seen.lock() {
      seen.insert(story.id.clone(), story);
    }
  }

  fn recall(&self, id: &str) -> Option<Story> {
    self.last_seen.lock().ok()?.get(id).cloned()
  }
}

impl<S: StoryStore> Clone for SyncCoordinator<S> {
  fn clone(&self) -> Self {
    Self {
      remote: self.remote.clone(),
      store: Arc::clone(&self.store),
      page_size: self.page_size,
      last_seen: Arc::clone(&self.last_seen),
    }
  }
}
