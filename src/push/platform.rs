//! The two sides a push subscription has to be kept consistent across.

use async_trait::async_trait;

use crate::api::{PushSubscription, RemoteStoryClient};
use crate::error::{PushError, StoryError};

/// Notification permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
  /// Never asked, or the prompt was dismissed
  Default,
  Granted,
  Denied,
}

/// The device push service (browser push manager, OS notification service).
#[async_trait]
pub trait PushPlatform: Send + Sync {
  fn is_supported(&self) -> bool;

  fn permission(&self) -> Permission;

  /// Prompt the user. Dismissing the prompt yields `Permission::Default`.
  async fn request_permission(&self) -> Result<Permission, PushError>;

  /// Register with the push service. Returns the existing registration if
  /// one is already present.
  async fn subscribe(&self, application_server_key: &[u8]) -> Result<PushSubscription, PushError>;

  async fn get_subscription(&self) -> Result<Option<PushSubscription>, PushError>;

  /// Returns false when there was nothing to remove.
  async fn unsubscribe(&self, subscription: &PushSubscription) -> Result<bool, PushError>;
}

/// Server-side record of which endpoints receive notifications.
#[async_trait]
pub trait PushRegistry: Send + Sync {
  async fn register(&self, subscription: &PushSubscription) -> Result<(), StoryError>;

  async fn unregister(&self, endpoint: &str) -> Result<(), StoryError>;
}

#[async_trait]
impl PushRegistry for RemoteStoryClient {
  async fn register(&self, subscription: &PushSubscription) -> Result<(), StoryError> {
    self.subscribe_push(subscription).await
  }

  async fn unregister(&self, endpoint: &str) -> Result<(), StoryError> {
    self.unsubscribe_push(endpoint).await
  }
}
