//! Translate `OpenAI` Chat Completion responses back into Claude Messages responses.

use super::anthropic_types::{MessagesResponse, ResponseContentBlock, StopReason, Usage};
use super::openai_types::{ChatCompletionResponse, ChatErrorResponse};

/// Translate an OpenAI Chat Completion response into a Claude Messages response.
/// Pure function: original_model is what the caller originally requested.
pub fn openai_to_anthropic(
    resp: &ChatCompletionResponse,
    original_model: &str,
) -> MessagesResponse {
    let choice = resp.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        if let Some(ref text) = c.message.content {
            content.push(ResponseContentBlock::Text { text: text.clone() });
        }

        if let Some(ref tool_calls) = c.message.tool_calls {
            for tc in tool_calls {
                let input: serde_json::Value = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or_else(|_| {
                        serde_json::json!({ "raw_arguments": tc.function.arguments })
                    });

                let id = if tc.id.is_empty() {
                    generate_tool_use_id()
                } else {
                    tc.id.clone()
                };

                content.push(ResponseContentBlock::ToolUse {
                    id,
                    name: tc.function.name.clone(),
                    input,
                });
            }
        }
    }

    // The Messages API requires at least one content block
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map_or(StopReason::EndTurn, map_finish_reason);

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });

    let id = if resp.id.is_empty() {
        generate_message_id()
    } else {
        format!("msg_{}", resp.id.trim_start_matches("chatcmpl-"))
    };

    MessagesResponse {
        id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage,
    }
}

/// Map OpenAI finish_reason to Claude stop_reason. Total: unknown reasons end the turn.
pub fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "content_filter" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

/// Pull the human-readable message out of a provider error body, if it has the usual shape.
pub fn provider_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ChatErrorResponse>(body)
        .ok()
        .map(|e| e.error.message)
}

pub fn generate_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

fn generate_tool_use_id() -> String {
    format!("toolu_{}", uuid::Uuid::new_v4().simple())
}
