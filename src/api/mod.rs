//! Story API client and wire types.

pub mod api_types;
mod client;
mod types;

pub use client::{Body, CallOptions, RemoteStoryClient};
pub use types::{
  LocationFilter, LoginResult, NewStory, PhotoUpload, PushKeys, PushSubscription, Story,
};
