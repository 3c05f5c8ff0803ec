//! Push subscription lifecycle across the platform and the story server.

use std::sync::{Mutex, MutexGuard, OnceLock};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use tracing::{error, info, warn};

use super::platform::{Permission, PushPlatform, PushRegistry};
use crate::api::PushSubscription;
use crate::config::PushConfig;
use crate::error::PushError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushState {
  Unsupported,
  PermissionDenied,
  PermissionDefault,
  Unsubscribed,
  Subscribed(PushSubscription),
  /// A subscribe or unsubscribe is in flight
  Transitioning,
}

impl PushState {
  pub fn name(&self) -> &'static str {
    match self {
      PushState::Unsupported => "unsupported",
      PushState::PermissionDenied => "permission denied",
      PushState::PermissionDefault => "permission not granted",
      PushState::Unsubscribed => "unsubscribed",
      PushState::Subscribed(_) => "subscribed",
      PushState::Transitioning => "transitioning",
    }
  }

  /// Text telling the user what they can do in this state.
  pub fn guidance(&self) -> &'static str {
    match self {
      PushState::Unsupported => "Push notifications are not supported on this device.",
      PushState::PermissionDenied => {
        "Notifications are blocked. Allow them in your browser's site settings, then reload the page."
      }
      PushState::PermissionDefault => "Enable notifications to hear about new stories.",
      PushState::Unsubscribed => "Subscribe to get notified about new stories.",
      PushState::Subscribed(_) => "You are subscribed to story notifications.",
      PushState::Transitioning => "Updating your notification settings...",
    }
  }

  pub fn is_subscribed(&self) -> bool {
    matches!(self, PushState::Subscribed(_))
  }
}

fn lock(state: &Mutex<PushState>) -> MutexGuard<'_, PushState> {
  state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds the state at `Transitioning` until settled. Dropping it unsettled
/// puts the previous state back.
struct Transition<'a> {
  state: &'a Mutex<PushState>,
  previous: Option<PushState>,
}

impl Transition<'_> {
  fn settle(mut self, next: PushState) -> PushState {
    self.previous = None;
    *lock(self.state) = next.clone();
    info!(state = next.name(), "push state settled");
    next
  }
}

impl Drop for Transition<'_> {
  fn drop(&mut self) {
    if let Some(previous) = self.previous.take() {
      *lock(self.state) = previous;
    }
  }
}

/// Keeps the platform registration and the server registry in step.
pub struct PushSubscriptionManager<P, R> {
  platform: P,
  registry: R,
  vapid_public_key: Option<String>,
  supported: OnceLock<bool>,
  state: Mutex<PushState>,
}

impl<P: PushPlatform, R: PushRegistry> PushSubscriptionManager<P, R> {
  /// The manager reports `Unsupported` until `init` has run.
  pub fn new(platform: P, registry: R, config: &PushConfig) -> Self {
    Self {
      platform,
      registry,
      vapid_public_key: config.vapid_public_key.clone(),
      supported: OnceLock::new(),
      state: Mutex::new(PushState::Unsupported),
    }
  }

  pub fn state(&self) -> PushState {
    lock(&self.state).clone()
  }

  fn begin(&self) -> Result<(Transition<'_>, PushState), PushError> {
    let mut state = lock(&self.state);
    if *state == PushState::Transitioning {
      return Err(PushError::Busy);
    }
    let previous = std::mem::replace(&mut *state, PushState::Transitioning);
    Ok((
      Transition {
        state: &self.state,
        previous: Some(previous.clone()),
      },
      previous,
    ))
  }

  /// Detect capability and map permission plus any existing registration to a state.
  pub async fn init(&self) -> Result<PushState, PushError> {
    let (transition, _) = self.begin()?;

    if !*self.supported.get_or_init(|| self.platform.is_supported()) {
      return Ok(transition.settle(PushState::Unsupported));
    }

    let next = match self.platform.permission() {
      Permission::Denied => PushState::PermissionDenied,
      Permission::Default => PushState::PermissionDefault,
      Permission::Granted => match self.platform.get_subscription().await? {
        Some(subscription) => PushState::Subscribed(subscription),
        None => PushState::Unsubscribed,
      },
    };
    Ok(transition.settle(next))
  }

  fn application_server_key(&self) -> Result<Vec<u8>, PushError> {
    let key = self
      .vapid_public_key
      .as_deref()
      .ok_or_else(|| PushError::Platform("no VAPID public key configured".into()))?;
    URL_SAFE_NO_PAD
      .decode(key.trim().trim_end_matches('='))
      .map_err(|e| PushError::Platform(format!("invalid VAPID public key: {}", e)))
  }

  /// Ask for permission if needed, register on the platform, then with the server.
  pub async fn subscribe(&self) -> Result<PushState, PushError> {
    let (transition, previous) = self.begin()?;
    match previous {
      PushState::PermissionDefault | PushState::Unsubscribed => {}
      PushState::Unsupported => return Err(PushError::Unsupported),
      PushState::PermissionDenied => return Err(PushError::PermissionDenied),
      other => {
        return Err(PushError::InvalidState {
          action: "subscribe",
          state: other.name(),
        })
      }
    }

    if self.platform.permission() != Permission::Granted {
      match self.platform.request_permission().await? {
        Permission::Granted => info!("notification permission granted"),
        Permission::Denied => {
          transition.settle(PushState::PermissionDenied);
          return Err(PushError::PermissionDenied);
        }
        Permission::Default => {
          info!("permission prompt dismissed");
          return Ok(transition.settle(PushState::PermissionDefault));
        }
      }
    }

    let key = self.application_server_key()?;
    let subscription = match self.platform.subscribe(&key).await {
      Ok(subscription) => subscription,
      Err(e) => {
        transition.settle(PushState::Unsubscribed);
        return Err(e);
      }
    };

    if let Err(server_err) = self.registry.register(&subscription).await {
      warn!("server rejected subscription, rolling back platform registration: {}", server_err);
      let rollback = self.platform.unsubscribe(&subscription).await;
      transition.settle(PushState::Unsubscribed);
      return match rollback {
        Ok(_) => Err(PushError::Server(server_err)),
        Err(rollback_err) => {
          error!(endpoint = %subscription.endpoint, "rollback failed: {}", rollback_err);
          Err(PushError::PartialFailure(format!(
            "server rejected the subscription ({}) and the platform registration could not be removed ({})",
            server_err, rollback_err
          )))
        }
      };
    }

    Ok(transition.settle(PushState::Subscribed(subscription)))
  }

  /// Remove the server record first, then the platform registration.
  pub async fn unsubscribe(&self) -> Result<PushState, PushError> {
    let (transition, previous) = self.begin()?;
    let subscription = match previous {
      PushState::Subscribed(subscription) => subscription,
      PushState::Unsupported => return Err(PushError::Unsupported),
      other => {
        return Err(PushError::InvalidState {
          action: "unsubscribe",
          state: other.name(),
        })
      }
    };

    if let Err(e) = self.registry.unregister(&subscription.endpoint).await {
      warn!("server kept the subscription: {}", e);
      transition.settle(PushState::Subscribed(subscription));
      return Err(PushError::PartialFailure(format!(
        "server could not remove the subscription: {}",
        e
      )));
    }

    match self.platform.unsubscribe(&subscription).await {
      Ok(_) => Ok(transition.settle(PushState::Unsubscribed)),
      Err(platform_err) => {
        warn!("platform unregister failed, restoring server record: {}", platform_err);
        let restored = self.registry.register(&subscription).await;
        transition.settle(PushState::Subscribed(subscription));
        match restored {
          Ok(()) => Err(PushError::PartialFailure(format!(
            "platform unregister failed ({}); server subscription restored",
            platform_err
          ))),
          Err(restore_err) => {
            error!("could not restore server subscription: {}", restore_err);
            Err(PushError::PartialFailure(format!(
              "platform unregister failed ({}) and the server record could not be restored ({})",
              platform_err, restore_err
            )))
          }
        }
      }
    }
  }

  /// Subscribe when not subscribed, unsubscribe when subscribed.
  pub async fn toggle(&self) -> Result<PushState, PushError> {
    if self.state().is_subscribed() {
      self.unsubscribe().await
    } else {
      self.subscribe().await
    }
  }
}
