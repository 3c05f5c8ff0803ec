mod manager;
mod payload;
mod platform;

pub use manager::{PushState, PushSubscriptionManager};
pub use payload::NotificationPayload;
pub use platform::{Permission, PushPlatform, PushRegistry};
