//! Glue between the axum handlers and the provider client.

use crate::error::{ProxyError, Result};
use crate::logging::LogLevel;
use crate::server::AppState;
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse};
use crate::translate::openai_types::ChatCompletionRequest;
use crate::translate::request::anthropic_to_openai_with_budget;
use crate::translate::response::openai_to_anthropic;
use crate::translate::streaming::{translate_byte_stream, SseStream};

use futures::StreamExt;
use tracing::{info, warn};

/// Convert an inbound request into the provider request, enforcing the
/// `max_tokens` ceiling. Fails only when oversized `max_tokens` is configured
/// to be rejected.
pub fn prepare_request(
    req: &MessagesRequest,
    state: &AppState,
    stream: bool,
) -> Result<ChatCompletionRequest> {
    let limit = state.config.limits.max_tokens_limit;

    if req.max_tokens > limit && state.config.limits.reject_oversized_max_tokens {
        return Err(ProxyError::invalid_request(format!(
            "max_tokens: {} > {}, which is the maximum allowed",
            req.max_tokens, limit
        )));
    }

    let mut openai_req =
        anthropic_to_openai_with_budget(req, &state.models, state.config.limits.request_budget_bytes);
    openai_req.stream = stream;

    if openai_req.max_tokens > limit {
        warn!(requested = openai_req.max_tokens, limit, "Clamping max_tokens");
        openai_req.max_tokens = limit;
    }

    Ok(openai_req)
}

/// Forward a non-streaming request through the provider.
pub async fn proxy_non_streaming(
    req: &MessagesRequest,
    state: &AppState,
    credential: Option<&str>,
) -> Result<MessagesResponse> {
    let openai_req = prepare_request(req, state, false)?;

    state.logger.info(
        "proxy",
        format!("POST model={} -> {}", req.model, openai_req.model),
    );

    let openai_resp = state
        .client
        .chat(&openai_req, credential)
        .await
        .map_err(|e| {
            state.logger.error("proxy", format!("Provider call failed: {e}"));
            e
        })?;

    let anthropic_resp = openai_to_anthropic(&openai_resp, &req.model);

    info!(
        input_tokens = anthropic_resp.usage.input_tokens,
        output_tokens = anthropic_resp.usage.output_tokens,
        "Completed"
    );
    state.logger.log_with_context(
        LogLevel::Info,
        "proxy",
        "Completed",
        serde_json::json!({
            "model": openai_req.model,
            "input_tokens": anthropic_resp.usage.input_tokens,
            "output_tokens": anthropic_resp.usage.output_tokens,
        }),
    );

    Ok(anthropic_resp)
}

/// Forward a streaming request, returning the translated Claude SSE events.
///
/// Errors before the first byte (rejection, connect failure, timeout) are
/// returned as `Err`; later ones arrive as a terminal `error` event.
pub async fn proxy_streaming(
    req: &MessagesRequest,
    state: &AppState,
    credential: Option<&str>,
) -> Result<SseStream> {
    let openai_req = prepare_request(req, state, true)?;

    state.logger.info(
        "proxy",
        format!("POST model={} -> {} (streaming)", req.model, openai_req.model),
    );

    let bytes = state
        .client
        .chat_stream(&openai_req, credential)
        .await
        .map_err(|e| {
            state.logger.error("proxy", format!("Provider call failed: {e}"));
            e
        })?;

    let logger = state.logger.clone();
    let events = translate_byte_stream(bytes, req.model.clone()).inspect(move |event| {
        if event.event == "error" {
            logger.error("stream", format!("Stream ended with error: {}", event.data));
        }
    });

    Ok(Box::pin(events))
}
