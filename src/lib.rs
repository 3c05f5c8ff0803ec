//! Offline-capable story feed core: API client, local story cache, sync
//! policy, HTTP caching router and push subscription lifecycle.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod push;
pub mod router;
pub mod session;
pub mod sync;
