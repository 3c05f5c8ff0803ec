use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use storyline::api::{NewStory, PhotoUpload, RemoteStoryClient, Story};
use storyline::cache::{Sourced, SqliteStoryStore};
use storyline::config::{self, Config};
use storyline::session::{AuthSession, FileSession, SessionStore};
use storyline::sync::SyncCoordinator;

#[derive(Parser, Debug)]
#[command(name = "storyline")]
#[command(about = "Browse, post and favorite stories, online or offline")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./storyline.yaml or $XDG_CONFIG_HOME/storyline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the story feed
  Feed,
  /// Show one story
  Detail { id: String },
  /// Add or remove a story from favorites
  Favorite { id: String },
  /// List favorite stories
  Favorites,
  Login {
    email: String,
    #[arg(long)]
    password: String,
  },
  Register {
    name: String,
    email: String,
    #[arg(long)]
    password: String,
  },
  Logout,
  /// Post a story with a photo
  Post {
    #[arg(short, long)]
    description: String,
    #[arg(short, long)]
    photo: PathBuf,
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,
  },
  /// Drop the locally cached feed (favorites are kept)
  ClearCache,
}

fn init_tracing() -> Result<WorkerGuard> {
  let dir = config::data_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create data directory {}: {}", dir.display(), e))?;

  let file = tracing_appender::rolling::never(&dir, "storyline.log");
  let (writer, guard) = tracing_appender::non_blocking(file);
  let filter =
    EnvFilter::try_from_env("STORYLINE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
  Ok(guard)
}

fn print_story(story: &Story) {
  println!("{}  {}  ({})", story.id, story.name, story.created_at.format("%Y-%m-%d %H:%M"));
  println!("    {}", story.description);
  if let (Some(lat), Some(lon)) = (story.lat, story.lon) {
    println!("    at {:.4}, {:.4}", lat, lon);
  }
}

fn print_source<T>(result: &Sourced<T>) {
  if !result.is_live() {
    println!("(offline: showing {} data)", result.source);
  }
}

fn mime_type(path: &Path) -> &'static str {
  match path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase())
    .as_deref()
  {
    Some("png") => "image/png",
    Some("gif") => "image/gif",
    Some("webp") => "image/webp",
    _ => "image/jpeg",
  }
}

fn read_photo(path: &Path) -> Result<PhotoUpload> {
  let bytes =
    std::fs::read(path).map_err(|e| eyre!("Failed to read photo {}: {}", path.display(), e))?;
  let file_name = path
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or("photo.jpg")
    .to_string();
  Ok(PhotoUpload {
    bytes,
    file_name,
    mime_type: mime_type(path).to_string(),
  })
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing()?;

  let config = Config::load(args.config.as_deref())?;
  let session: Arc<dyn SessionStore> = Arc::new(FileSession::open(Config::token_override())?);
  let store = Arc::new(SqliteStoryStore::open(config.cache.path.as_deref())?);
  let remote = RemoteStoryClient::new(&config.api, Arc::clone(&session))?;
  let sync = SyncCoordinator::new(remote.clone(), store).with_page_size(config.api.page_size);

  match args.command {
    Command::Feed => {
      let feed = sync.load_feed().await?;
      print_source(&feed);
      for story in &feed.data {
        print_story(story);
      }
    }
    Command::Detail { id } => {
      let story = sync.load_detail(&id).await?;
      print_source(&story);
      print_story(&story.data);
      if session.is_logged_in() && sync.is_favorite(&id)? {
        println!("    * favorite");
      }
    }
    Command::Favorite { id } => {
      if sync.toggle_favorite(&id).await? {
        println!("Added {} to favorites", id);
      } else {
        println!("Removed {} from favorites", id);
      }
    }
    Command::Favorites => {
      let favorites = sync.list_favorites()?;
      if favorites.is_empty() {
        println!("No favorite stories yet");
      }
      for story in &favorites {
        print_story(story);
      }
    }
    Command::Login { email, password } => {
      let result = remote.login(&email, &password).await?;
      let auth = AuthSession::from(result);
      println!("Logged in as {}", auth.user_name);
      session.save(auth);
    }
    Command::Register {
      name,
      email,
      password,
    } => {
      let message = remote.register(&name, &email, &password).await?;
      println!("{}", message);
    }
    Command::Logout => {
      session.clear();
      println!("Logged out");
    }
    Command::Post {
      description,
      photo,
      lat,
      lon,
    } => {
      let story = NewStory {
        description,
        photo: read_photo(&photo)?,
        lat,
        lon,
      };
      let message = sync.post_story(&story).await?;
      println!("{}", message);
    }
    Command::ClearCache => {
      sync.clear_recent()?;
      println!("Cleared cached stories");
    }
  }

  Ok(())
}
