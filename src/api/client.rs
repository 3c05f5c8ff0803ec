use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::api::api_types::{
  self, reserialize, ApiLoginResponse, ApiStoryDetailResponse, ApiStoryListResponse,
};
use crate::api::types::{LocationFilter, LoginResult, NewStory, PushSubscription, Story};
use crate::config::{ApiConfig, Endpoints};
use crate::error::StoryError;
use crate::session::SessionStore;

/// Request body for a story API call.
pub enum Body {
  Empty,
  /// Sent as `application/json`
  Json(Value),
  /// Content type left to the transport so it can set the boundary
  Multipart(Form),
}

/// Per-call options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
  pub requires_auth: bool,
}

impl CallOptions {
  pub const AUTHED: CallOptions = CallOptions {
    requires_auth: true,
  };
  pub const GUEST: CallOptions = CallOptions {
    requires_auth: false,
  };
}

/// Story API client. Every server call goes through [`RemoteStoryClient::call`].
#[derive(Clone)]
pub struct RemoteStoryClient {
  http: reqwest::Client,
  base_url: Url,
  endpoints: Endpoints,
  session: Arc<dyn SessionStore>,
}

impl RemoteStoryClient {
  pub fn new(config: &ApiConfig, session: Arc<dyn SessionStore>) -> Result<Self> {
    let mut base = config.base_url.trim().to_string();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;

    let http = reqwest::Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      endpoints: config.endpoints.clone(),
      session,
    })
  }

  pub fn session(&self) -> &Arc<dyn SessionStore> {
    &self.session
  }

  fn url(&self, endpoint: &str) -> Result<Url, StoryError> {
    self
      .base_url
      .join(endpoint.trim_start_matches('/'))
      .map_err(|e| StoryError::InvalidRequest(format!("bad endpoint {}: {}", endpoint, e)))
  }

  /// Perform one API call and return the interpreted JSON body.
  ///
  /// Fails with `AuthRequired` before touching the network when the call needs
  /// a session and none exists.
  pub async fn call(
    &self,
    endpoint: &str,
    method: Method,
    body: Body,
    options: CallOptions,
  ) -> Result<Value, StoryError> {
    let token = if options.requires_auth {
      Some(self.session.token().ok_or(StoryError::AuthRequired)?)
    } else {
      None
    };

    let url = self.url(endpoint)?;
    debug!(%method, %url, "story API call");

    let mut request = self.http.request(method.clone(), url.clone());
    if let Some(token) = &token {
      request = request.bearer_auth(token);
    }
    request = match body {
      Body::Empty => request,
      Body::Json(value) => request.json(&value),
      Body::Multipart(form) => request.multipart(form),
    };

    let response = request.send().await.map_err(|e| {
      warn!(%url, "network failure: {}", e);
      StoryError::Network(e)
    })?;

    let status = response.status();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(str::to_owned);
    let text = response.text().await?;

    let value = interpret_body(status, content_type.as_deref(), &text);

    if !status.is_success() || api_types::error_flag(&value) {
      let message = api_types::message(&value)
        .map(String::from)
        .or_else(|| status.canonical_reason().map(String::from))
        .unwrap_or_else(|| format!("API request failed with status {}", status.as_u16()));
      warn!(%method, %url, status = status.as_u16(), "API error: {}", message);
      return Err(StoryError::Api {
        status: status.as_u16(),
        message,
      });
    }

    Ok(value)
  }

  /// Create an account. Returns the server's confirmation message.
  pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<String, StoryError> {
    let body = json!({ "name": name, "email": email, "password": password });
    let value = self
      .call(
        &self.endpoints.register,
        Method::POST,
        Body::Json(body),
        CallOptions::GUEST,
      )
      .await?;

    Ok(api_types::message(&value).unwrap_or("User created").to_string())
  }

  pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult, StoryError> {
    let body = json!({ "email": email, "password": password });
    let value = self
      .call(
        &self.endpoints.login,
        Method::POST,
        Body::Json(body),
        CallOptions::GUEST,
      )
      .await?;

    let response: ApiLoginResponse =
      reserialize(value).map_err(|e| StoryError::Decode(format!("login result: {}", e)))?;
    Ok(response.login_result)
  }

  pub async fn list_stories(
    &self,
    page: u32,
    size: u32,
    location: LocationFilter,
  ) -> Result<Vec<Story>, StoryError> {
    let endpoint = format!(
      "{}?page={}&size={}&location={}",
      self.endpoints.stories,
      page,
      size,
      location.as_query_value()
    );
    let value = self
      .call(&endpoint, Method::GET, Body::Empty, CallOptions::AUTHED)
      .await?;

    let response: ApiStoryListResponse =
      reserialize(value).map_err(|e| StoryError::Decode(format!("story list: {}", e)))?;
    Ok(response.list_story)
  }

  pub async fn get_story_detail(&self, id: &str) -> Result<Story, StoryError> {
    if matches!(id.trim(), "" | "." | "..") {
      return Err(StoryError::InvalidRequest(format!("invalid story id {:?}", id)));
    }
    // The id is pushed as one encoded path segment so it cannot reach another endpoint.
    let mut url = self.url(&self.endpoints.stories)?;
    url
      .path_segments_mut()
      .map_err(|_| StoryError::InvalidRequest("story endpoint cannot take an id".into()))?
      .pop_if_empty()
      .push(id);
    let value = self
      .call(url.as_str(), Method::GET, Body::Empty, CallOptions::AUTHED)
      .await?;

    let response: ApiStoryDetailResponse =
      reserialize(value).map_err(|e| StoryError::Decode(format!("story {}: {}", id, e)))?;
    Ok(response.story)
  }

  /// Submit a new story as multipart form data. Guest submissions skip auth.
  pub async fn create_story(&self, story: &NewStory, as_guest: bool) -> Result<String, StoryError> {
    let photo = Part::bytes(story.photo.bytes.clone())
      .file_name(story.photo.file_name.clone())
      .mime_str(&story.photo.mime_type)
      .map_err(|e| StoryError::InvalidRequest(format!("photo mime type: {}", e)))?;

    let mut form = Form::new()
      .text("description", story.description.clone())
      .part("photo", photo);
    if let Some((lat, lon)) = story.coordinates() {
      form = form.text("lat", lat.to_string()).text("lon", lon.to_string());
    }

    let (endpoint, options) = if as_guest {
      (&self.endpoints.stories_guest, CallOptions::GUEST)
    } else {
      (&self.endpoints.stories, CallOptions::AUTHED)
    };

    let value = self
      .call(endpoint, Method::POST, Body::Multipart(form), options)
      .await?;
    Ok(api_types::message(&value).unwrap_or("Story created").to_string())
  }

  pub async fn subscribe_push(&self, subscription: &PushSubscription) -> Result<(), StoryError> {
    let body = json!({
      "endpoint": subscription.endpoint,
      "keys": subscription.keys,
    });
    self
      .call(
        &self.endpoints.push_subscribe,
        Method::POST,
        Body::Json(body),
        CallOptions::AUTHED,
      )
      .await?;
    Ok(())
  }

  pub async fn unsubscribe_push(&self, endpoint: &str) -> Result<(), StoryError> {
    if endpoint.trim().is_empty() {
      return Err(StoryError::InvalidRequest(
        "subscription endpoint is required to unsubscribe".into(),
      ));
    }
    let body = json!({ "endpoint": endpoint });
    self
      .call(
        &self.endpoints.push_unsubscribe,
        Method::DELETE,
        Body::Json(body),
        CallOptions::AUTHED,
      )
      .await?;
    Ok(())
  }
}

/// Turn a response body into JSON without trusting the declared content type.
fn interpret_body(status: StatusCode, content_type: Option<&str>, text: &str) -> Value {
  let trimmed = text.trim();
  if status == StatusCode::NO_CONTENT || trimmed.is_empty() {
    return if status.is_success() {
      json!({ "error": false, "message": "success" })
    } else {
      json!({})
    };
  }

  let declared_json = content_type
    .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
    .unwrap_or(false);
  let looks_like_json = trimmed.starts_with('{') || trimmed.starts_with('[');

  if declared_json || looks_like_json {
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
      return value;
    }
  }

  debug!("non-JSON response body, wrapping as message");
  json!({ "message": trimmed })
}
