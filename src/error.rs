//! Error types for the bridge.

use thiserror::Error;

use crate::classify::classify_error_message;
use crate::translate::anthropic_types::ErrorResponse;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// `size` is the declared length when the caller sent one.
    #[error("Request body exceeds the {limit} byte limit")]
    PayloadTooLarge { size: Option<u64>, limit: u64 },

    #[error("Provider returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Stream error: {message}")]
    Stream { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn upstream(status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: msg.into(),
        }
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// HTTP status this error is reported with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => 400,
            Self::PayloadTooLarge { .. } => 413,
            Self::Upstream { status, .. } if *status >= 400 => *status,
            Self::Upstream { .. } | Self::Http(_) | Self::Stream { .. } => 502,
            Self::Timeout { .. } => 504,
            _ => 500,
        }
    }

    /// Build the Claude-style error envelope for this error.
    ///
    /// Destination-side failures go through the classifier; internal
    /// failures are reported generically.
    #[must_use]
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            Self::InvalidRequest { message } => ErrorResponse::invalid_request(message.clone()),
            Self::PayloadTooLarge { .. } => ErrorResponse::request_too_large(self.to_string()),
            Self::Upstream { status: 413, message } => {
                ErrorResponse::request_too_large(classify_error_message(message))
            }
            Self::Upstream { message, .. } | Self::Stream { message } => {
                ErrorResponse::api_error(classify_error_message(message))
            }
            Self::Timeout { .. } | Self::Http(_) => {
                ErrorResponse::api_error(classify_error_message(&self.to_string()))
            }
            _ => ErrorResponse::api_error("Internal server error"),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
