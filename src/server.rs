use crate::client::OpenAiClient;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::logging::SharedLogger;
use crate::proxy;
use crate::translate::anthropic_types::{MessagesRequest, TokenCountRequest};
use crate::translate::model_map::ModelMapper;
use crate::translate::streaming::SseEvent;
use crate::translate::tokens::count_tokens;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const HEALTH_RECENT_ERRORS: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: OpenAiClient,
    pub models: ModelMapper,
    pub logger: SharedLogger,
}

impl AppState {
    pub fn new(config: ProxyConfig, logger: SharedLogger) -> Self {
        Self {
            client: OpenAiClient::from_config(&config),
            models: ModelMapper::from_config(&config.models),
            config,
            logger,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
        (status, Json(self.to_error_response())).into_response()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let req: MessagesRequest = match read_json(&state, &headers, body).await {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    let is_streaming = req.stream.unwrap_or(false);

    info!(
        model = %req.model,
        streaming = is_streaming,
        messages = req.messages.len(),
        "Request"
    );

    let credential = if state.config.provider.forward_client_credential {
        extract_credential(&headers)
    } else {
        None
    };

    if is_streaming {
        handle_streaming(&state, &req, credential.as_deref()).await
    } else {
        match proxy::proxy_non_streaming(&req, &state, credential.as_deref()).await {
            Ok(resp) => Json(resp).into_response(),
            Err(e) => {
                error!(error = %e, "Request failed");
                e.into_response()
            }
        }
    }
}

async fn handle_streaming(
    state: &AppState,
    req: &MessagesRequest,
    credential: Option<&str>,
) -> Response {
    let sse_stream = match proxy::proxy_streaming(req, state, credential).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Streaming setup failed");
            return e.into_response();
        }
    };

    let event_stream = sse_stream
        .chain(stream::once(async { SseEvent::done() }))
        .map(|sse_event| -> std::result::Result<Event, Infallible> {
            Ok(Event::default().event(sse_event.event).data(sse_event.data))
        });

    Sse::new(event_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn handle_count_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    match read_json::<TokenCountRequest>(&state, &headers, body).await {
        Ok(req) => Json(count_tokens(&req)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "recent_errors": state.logger.recent_errors(HEALTH_RECENT_ERRORS),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut names: Vec<&str> = Vec::new();
    for name in [state.models.big(), state.models.middle(), state.models.small()] {
        if !names.contains(&name) {
            names.push(name);
        }
    }

    let models: Vec<serde_json::Value> = names
        .into_iter()
        .map(|name| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "owned_by": "claude-bridge",
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

/// Read and parse a JSON body, enforcing the inbound size limit.
async fn read_json<T: serde::de::DeserializeOwned>(
    state: &AppState,
    headers: &HeaderMap,
    body: Body,
) -> Result<T, ProxyError> {
    let limit = state.config.limits.max_request_bytes;

    let result = match check_content_length(headers, limit) {
        Ok(()) => axum::body::to_bytes(body, limit)
            .await
            .map_err(|e| body_read_error(&e, limit))
            .and_then(|bytes| parse_body(&bytes)),
        Err(e) => Err(e),
    };

    if let Err(ref e) = result {
        state.logger.warn("server", e.to_string());
    }
    result
}

/// Body reads fail either on the size limit or on the transport.
fn body_read_error(e: &axum::Error, limit: usize) -> ProxyError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = source {
        if err.to_string().contains("length limit exceeded") {
            return ProxyError::PayloadTooLarge {
                size: None,
                limit: limit as u64,
            };
        }
        source = err.source();
    }
    ProxyError::invalid_request(format!("Failed to read request body: {e}"))
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ProxyError> {
    serde_json::from_slice(body)
        .map_err(|e| ProxyError::invalid_request(format!("Invalid request body: {e}")))
}

/// Reject bodies whose declared length is over the limit, before reading them.
fn check_content_length(headers: &HeaderMap, limit: usize) -> Result<(), ProxyError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    match declared {
        Some(size) if size > limit as u64 => Err(ProxyError::PayloadTooLarge {
            size: Some(size),
            limit: limit as u64,
        }),
        _ => Ok(()),
    }
}

/// Caller credential: `x-api-key`, else an `Authorization: Bearer` token.
fn extract_credential(headers: &HeaderMap) -> Option<String> {
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let bearer = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    api_key.or_else(bearer).map(str::to_string)
}
