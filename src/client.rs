//! Outbound HTTP client for the `OpenAI`-compatible destination API.
//!
//! One POST to `{base_url}/chat/completions` per inbound request. No retries:
//! transport failures, timeouts and non-2xx statuses come back as typed errors.

use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::translate::openai_types::{ChatCompletionRequest, ChatCompletionResponse};
use crate::translate::response::provider_error_message;

const ERROR_BODY_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    api_version: Option<String>,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            api_version: None,
            timeout,
        }
    }

    /// Azure-style deployments: adds `?api-version=` and an `api-key` header.
    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        let client = Self::new(
            config.provider.base_url.clone(),
            config.resolve_api_key(),
            Duration::from_secs(config.limits.request_timeout_secs),
        );
        match config.provider.api_version {
            Some(ref version) => client.with_api_version(version.clone()),
            None => client,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Non-streaming completion. `credential` overrides the client's own key.
    ///
    /// One timeout covers the whole exchange, headers and body together.
    pub async fn chat(
        &self,
        req: &ChatCompletionRequest,
        credential: Option<&str>,
    ) -> Result<ChatCompletionResponse> {
        let exchange = async {
            let response = self.send(req, credential).await?;
            response.text().await.map_err(|e| self.transport_error(e))
        };

        let body = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| self.timed_out())??;

        debug!(body_len = body.len(), "Provider response received");

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            ProxyError::upstream(
                502,
                format!(
                    "Failed to parse provider response: {}. Body: {}",
                    e,
                    preview(&body)
                ),
            )
        })?;
        Ok(parsed)
    }

    /// Streaming completion: the raw `text/event-stream` body as bytes.
    ///
    /// The timeout covers the call up to the response headers; chunks are read
    /// at whatever pace the provider sends them.
    pub async fn chat_stream(
        &self,
        req: &ChatCompletionRequest,
        credential: Option<&str>,
    ) -> Result<impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static>
    {
        let response = tokio::time::timeout(self.timeout, self.send(req, credential))
            .await
            .map_err(|_| self.timed_out())??;
        Ok(response.bytes_stream())
    }

    /// Issue the request and turn non-2xx statuses into errors. Callers bound it
    /// with the client timeout.
    async fn send(
        &self,
        req: &ChatCompletionRequest,
        credential: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url = self.endpoint();
        info!(url = %url, model = %req.model, stream = req.stream, "POST chat completion");

        let mut builder = self.http.post(&url).json(req);

        if let Some(ref version) = self.api_version {
            builder = builder.query(&[("api-version", version.as_str())]);
        }

        if let Some(key) = credential.or(self.api_key.as_deref()) {
            builder = if self.api_version.is_some() {
                builder.header("api-key", key)
            } else {
                builder.bearer_auth(key)
            };
        }

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = provider_error_message(&body)
            .unwrap_or_else(|| format!("status {}: {}", status.as_u16(), preview(&body)));
        warn!(status = status.as_u16(), message = %message, "Provider returned an error");
        Err(ProxyError::upstream(status.as_u16(), message))
    }

    fn timed_out(&self) -> ProxyError {
        warn!(seconds = self.timeout.as_secs(), "Provider call timed out");
        ProxyError::Timeout {
            seconds: self.timeout.as_secs(),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ProxyError {
        if e.is_timeout() {
            self.timed_out()
        } else {
            ProxyError::Http(e)
        }
    }
}

fn preview(body: &str) -> String {
    body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect()
}
