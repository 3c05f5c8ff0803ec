//! Story storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::api::Story;

/// Durable local storage with two independent collections: the recent feed
/// and the user's favorites.
pub trait StoryStore: Send + Sync {
  /// Insert or replace stories by id. All or nothing.
  fn upsert_many(&self, stories: &[Story]) -> Result<()>;

  /// Every story in the recent-feed collection, in no particular order.
  fn get_all(&self) -> Result<Vec<Story>>;

  /// Look up one story in the recent-feed collection.
  fn get_by_id(&self, id: &str) -> Result<Option<Story>>;

  /// Empty the recent-feed collection. Favorites are untouched.
  fn clear_recent(&self) -> Result<()>;

  fn add_favorite(&self, story: &Story) -> Result<()>;

  fn remove_favorite(&self, id: &str) -> Result<()>;

  fn list_favorites(&self) -> Result<Vec<Story>>;

  fn is_favorite(&self, id: &str) -> Result<bool>;
}

/// Schema migrations, applied in order. Each one only adds collections.
const MIGRATIONS: &[&str] = &[
  // 1: recent feed
  r#"
CREATE TABLE IF NOT EXISTS stories (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
  // 2: favorites, a full copy of each story at the time it was favorited
  r#"
CREATE TABLE IF NOT EXISTS favorite_stories (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    favorited_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
];

/// SQLite-based story storage.
pub struct SqliteStoryStore {
  conn: Mutex<Connection>,
}

impl SqliteStoryStore {
  /// Open the store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open story database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a throwaway in-memory store.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    Ok(crate::config::data_dir()?.join("stories.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Current schema version.
  pub fn schema_version(&self) -> Result<usize> {
    let conn = self.conn()?;
    let version: i64 = conn
      .pragma_query_value(None, "user_version", |row| row.get(0))
      .map_err(|e| eyre!("Failed to read schema version: {}", e))?;
    Ok(version as usize)
  }

  /// Apply every migration newer than the stored version.
  fn run_migrations(&self) -> Result<()> {
    let mut conn = self.conn()?;
    let current: i64 = conn
      .pragma_query_value(None, "user_version", |row| row.get(0))
      .map_err(|e| eyre!("Failed to read schema version: {}", e))?;
    let current = current.max(0) as usize;

    if current >= MIGRATIONS.len() {
      return Ok(());
    }

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin migration: {}", e))?;
    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current) {
      tx.execute_batch(sql)
        .map_err(|e| eyre!("Failed to apply migration {}: {}", index + 1, e))?;
    }
    tx.pragma_update(None, "user_version", MIGRATIONS.len() as i64)
      .map_err(|e| eyre!("Failed to record schema version: {}", e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit migration: {}", e))?;

    info!(
      "story database upgraded from version {} to {}",
      current,
      MIGRATIONS.len()
    );
    Ok(())
  }

  fn read_all(conn: &Connection, sql: &str) -> Result<Vec<Story>> {
    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, Vec<u8>)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query stories: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read story row: {}", e))?;

    let stories = rows
      .into_iter()
      .filter_map(|(id, data)| match serde_json::from_slice(&data) {
        Ok(story) => Some(story),
        Err(e) => {
          warn!("skipping unreadable cached story {}: {}", id, e);
          None
        }
      })
      .collect();

    Ok(stories)
  }

  fn read_one(conn: &Connection, sql: &str, id: &str) -> Result<Option<Story>> {
    let data: Option<Vec<u8>> = conn
      .query_row(sql, params![id], |row| row.get(0))
      .optional()
      .map_err(|e| eyre!("Failed to look up story {}: {}", id, e))?;

    match data {
      Some(data) => {
        let story = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize story {}: {}", id, e))?;
        Ok(Some(story))
      }
      None => Ok(None),
    }
  }
}

impl StoryStore for SqliteStoryStore {
  fn upsert_many(&self, stories: &[Story]) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    {
      let mut stmt = tx
        .prepare(
          "INSERT OR REPLACE INTO stories (id, data, cached_at)
           VALUES (?, ?, datetime('now'))",
        )
        .map_err(|e| eyre!("Failed to prepare upsert: {}", e))?;

      for story in stories {
        let data =
          serde_json::to_vec(story).map_err(|e| eyre!("Failed to serialize story: {}", e))?;
        stmt
          .execute(params![story.id, data])
          .map_err(|e| eyre!("Failed to store story {}: {}", story.id, e))?;
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    debug!("{} stories cached", stories.len());
    Ok(())
  }

  fn get_all(&self) -> Result<Vec<Story>> {
    let conn = self.conn()?;
    Self::read_all(&conn, "SELECT id, data FROM stories")
  }

  fn get_by_id(&self, id: &str) -> Result<Option<Story>> {
    let conn = self.conn()?;
    Self::read_one(&conn, "SELECT data FROM stories WHERE id = ?", id)
  }

  fn clear_recent(&self) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute("DELETE FROM stories", [])
      .map_err(|e| eyre!("Failed to clear cached stories: {}", e))?;
    Ok(())
  }

  fn add_favorite(&self, story: &Story) -> Result<()> {
    let conn = self.conn()?;
    let data =
      serde_json::to_vec(story).map_err(|e| eyre!("Failed to serialize story: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO favorite_stories (id, data, favorited_at)
         VALUES (?, ?, datetime('now'))",
        params![story.id, data],
      )
      .map_err(|e| eyre!("Failed to add favorite {}: {}", story.id, e))?;

    Ok(())
  }

  fn remove_favorite(&self, id: &str) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute("DELETE FROM favorite_stories WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove favorite {}: {}", id, e))?;
    Ok(())
  }

  fn list_favorites(&self) -> Result<Vec<Story>> {
    let conn = self.conn()?;
    Self::read_all(
      &conn,
      "SELECT id, data FROM favorite_stories ORDER BY favorited_at DESC, id",
    )
  }

  fn is_favorite(&self, id: &str) -> Result<bool> {
    let conn = self.conn()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM favorite_stories WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to check favorite {}: {}", id, e))?;
    Ok(found.is_some())
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use chrono::{TimeZone, Utc};

  pub(crate) fn story(id: &str) -> Story {
    Story {
      id: id.to_string(),
      name: "Dimas".to_string(),
      description: format!("story {}", id),
      photo_url: format!("https://example.com/{}.jpg", id),
      lat: Some(-6.2),
      lon: Some(106.8),
      created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
    }
  }

  #[test]
  fn test_upsert_same_id_overwrites() {
    let store = SqliteStoryStore::open_in_memory().unwrap();
    store.upsert_many(&[story("a"), story("b")]).unwrap();
    assert_eq!(store.get_all().unwrap().len(), 2);

    let mut updated = story("a");
    updated.description = "edited".to_string();
    store.upsert_many(&[updated.clone()]).unwrap();

    assert_eq!(store.get_all().unwrap().len(), 2);
    assert_eq!(store.get_by_id("a").unwrap(), Some(updated));
  }

  #[test]
  fn test_failed_batch_leaves_store_unchanged() {
    let store = SqliteStoryStore::open_in_memory().unwrap();
    store.upsert_many(&[story("a"), story("b")]).unwrap();
    store
      .conn()
      .unwrap()
      .execute_batch(
        "CREATE TRIGGER reject_bad BEFORE INSERT ON stories
         WHEN NEW.id = 'bad'
         BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
      )
      .unwrap();

    let result = store.upsert_many(&[story("c"), story("bad"), story("d")]);

    assert!(result.is_err());
    let mut ids: Vec<String> = store.get_all().unwrap().into_iter().map(|s| s.id).collect();
    ids.sort();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
  }

  #[test]
  fn test_get_by_id_missing_is_none() {
    let store = SqliteStoryStore::open_in_memory().unwrap();
    assert_eq!(store.get_by_id("nope").unwrap(), None);
  }

  #[test]
  fn test_round_trip_keeps_fields() {
    let store = SqliteStoryStore::open_in_memory().unwrap();
    let mut no_location = story("c");
    no_location.lat = None;
    no_location.lon = None;
    store.upsert_many(&[story("a"), no_location.clone()]).unwrap();

    let mut all = store.get_all().unwrap();
    all.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(all, vec![story("a"), no_location]);
  }

  #[test]
  fn test_favorites_independent_of_recent_feed() {
    let store = SqliteStoryStore::open_in_memory().unwrap();
    store.add_favorite(&story("fav")).unwrap();

    assert!(store.get_all().unwrap().is_empty());
    assert_eq!(store.list_favorites().unwrap(), vec![story("fav")]);
    assert!(store.is_favorite("fav").unwrap());

    store.upsert_many(&[story("fav")]).unwrap();
    store.clear_recent().unwrap();
    assert!(store.get_all().unwrap().is_empty());
    assert!(store.is_favorite("fav").unwrap());
  }

  #[test]
  fn test_remove_favorite() {
    let store = SqliteStoryStore::open_in_memory().unwrap();
    store.add_favorite(&story("a")).unwrap();
    store.add_favorite(&story("a")).unwrap();
    assert_eq!(store.list_favorites().unwrap().len(), 1);

    store.remove_favorite("a").unwrap();
    assert!(!store.is_favorite("a").unwrap());
    assert!(store.list_favorites().unwrap().is_empty());
  }

  #[test]
  fn test_fresh_store_is_at_latest_version() {
    let store = SqliteStoryStore::open_in_memory().unwrap();
    assert_eq!(store.schema_version().unwrap(), MIGRATIONS.len());
  }

  #[test]
  fn test_upgrade_keeps_existing_collections() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(MIGRATIONS[0]).unwrap();
    conn.pragma_update(None, "user_version", 1i64).unwrap();
    let data = serde_json::to_vec(&story("old")).unwrap();
    conn
      .execute(
        "INSERT INTO stories (id, data) VALUES (?, ?)",
        params!["old", data],
      )
      .unwrap();

    let store = SqliteStoryStore::from_connection(conn).unwrap();

    assert_eq!(store.schema_version().unwrap(), 2);
    assert_eq!(store.get_by_id("old").unwrap(), Some(story("old")));
    store.add_favorite(&story("old")).unwrap();
    assert!(store.is_favorite("old").unwrap());
  }
}
