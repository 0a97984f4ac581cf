use avira_core::{AssistantBackend, AssistantRequest, ByteStream};
use futures::{StreamExt, TryStreamExt};
use reqwest::{Response, StatusCode};
use tracing::{debug, instrument};

use crate::convert::error_detail;
use crate::error::HttpError;
use crate::types::HealthStatus;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Client for the streaming assistant service.
pub struct AssistantClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for AssistantClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AssistantClient {
    /// Creates a client for a service on the default local address.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn health(&self) -> Result<HealthStatus, HttpError> {
        let response = self.http.get(format!("{}/health", self.base_url)).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

/// Turns a non-success response into [`HttpError::Api`].
pub(crate) async fn check_status(response: Response) -> Result<Response, HttpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| error_detail(&value))
        .or_else(|| Some(body.trim().to_string()).filter(|b| !b.is_empty()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string());

    Err(HttpError::Api {
        status: status.as_u16(),
        message,
    })
}

impl AssistantBackend for AssistantClient {
    type Error = HttpError;

    #[instrument(skip(self, request), fields(history = request.history.len()))]
    async fn open_stream(&self, request: &AssistantRequest) -> Result<Option<ByteStream<HttpError>>, HttpError> {
        debug!("Sending message to assistant");

        let response = self
            .http
            .post(format!("{}/message", self.base_url))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        if response.status() == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            debug!(status = %response.status(), "Response has no body");
            return Ok(None);
        }

        debug!(status = %response.status(), "Streaming response");
        let body = response.bytes_stream().map_err(HttpError::from).boxed();
        Ok(Some(body))
    }
}
