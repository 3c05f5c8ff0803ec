//! Network side of the intercept layer.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tracing::debug;

use super::http::{Request, Response};
use crate::error::FetchError;

/// Performs the real network request for a routed request.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// reqwest-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  /// Build a fetcher with an overall transport timeout. Strategy timeouts are
  /// applied separately by the router.
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }

  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    debug!(method = %request.method, url = %request.url, "network fetch");
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await?;

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
