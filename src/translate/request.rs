//! Translate Claude Messages API requests into `OpenAI` Chat Completions requests.
//!
//! Handles system messages, multi-part content (text, images), tool use, tool results,
//! and tool choice mapping. A single Claude message can expand into multiple `OpenAI`
//! messages (e.g. a user message with `tool_result` blocks becomes separate `tool`-role
//! messages). After conversion every assistant tool call is paired with a tool result
//! and the request is trimmed to the byte budget.

use std::collections::HashSet;

use serde_json::Value;

use super::anthropic_types::{
    ContentBlock, Message, MessagesRequest, Role, ToolChoice, ToolChoiceAuto, ToolChoiceSpecific,
    ToolResultContent,
};
use super::budget::{enforce_budget, truncate_text, DEFAULT_REQUEST_BUDGET_BYTES};
use super::model_map::ModelMapper;
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatRole, ChatTool,
    ChatToolCall, ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction,
    ChatToolChoiceSpecific, ContentPart, ImageUrlDetail,
};

/// Cap on the system prompt, in bytes.
pub const MAX_SYSTEM_BYTES: usize = 200_000;
/// Cap on one serialized tool call's arguments, in bytes.
pub const MAX_TOOL_ARGUMENT_BYTES: usize = 50_000;
/// Fields above this size are the first to go when arguments are over the cap.
const MAX_TOOL_FIELD_BYTES: usize = 10_000;

/// Text of the tool message synthesized for a tool call the caller never answered.
pub const MISSING_TOOL_RESULT: &str = "Tool execution completed without explicit result.";

/// Translate a Claude Messages API request into an `OpenAI` Chat Completions request,
/// trimmed to the default byte budget.
pub fn anthropic_to_openai(req: &MessagesRequest, models: &ModelMapper) -> ChatCompletionRequest {
    anthropic_to_openai_with_budget(req, models, DEFAULT_REQUEST_BUDGET_BYTES)
}

/// Same as [`anthropic_to_openai`] with an explicit byte budget.
/// Pure apart from logging: never fails, malformed inputs degrade to strings.
pub fn anthropic_to_openai_with_budget(
    req: &MessagesRequest,
    models: &ModelMapper,
    budget: usize,
) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        messages.push(ChatMessage::system(truncate_text(
            &system.as_text(),
            MAX_SYSTEM_BYTES,
        )));
    }

    for msg in &req.messages {
        let mut translated = translate_message(msg);
        messages.append(&mut translated);
    }

    let messages = reconcile_tool_results(messages);

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    });

    let tool_choice = req.tool_choice.as_ref().map(translate_tool_choice);

    let translated = ChatCompletionRequest {
        model: models.resolve(&req.model).to_string(),
        messages,
        max_tokens: req.max_tokens,
        stream: req.stream.unwrap_or(false),
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences.clone(),
        tools,
        tool_choice,
    };

    enforce_budget(translated, budget)
}

/// A single Claude message can expand to multiple `OpenAI` messages
/// (e.g. a user message with `tool_results` becomes separate tool-role messages).
fn translate_message(msg: &Message) -> Vec<ChatMessage> {
    let blocks = msg.content.blocks();

    match msg.role {
        Role::User => translate_user_message(&blocks),
        Role::Assistant => vec![translate_assistant_message(&blocks)],
    }
}

/// Tool results go first so they sit directly after the assistant turn that
/// asked for them; remaining text and images follow as one user message.
fn translate_user_message(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut content_parts: Vec<ContentPart> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                content_parts.push(ContentPart::Text { text: text.clone() });
            }
            ContentBlock::Image { source } => {
                let data_uri = format!("data:{};base64,{}", source.media_type, source.data);
                content_parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrlDetail {
                        url: data_uri,
                        detail: None,
                    },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let result_text = tool_result_to_string(content.as_ref(), *is_error);
                messages.push(ChatMessage::tool(tool_use_id.clone(), result_text));
            }
            ContentBlock::Thinking { .. } | ContentBlock::ToolUse { .. } => {}
        }
    }

    if !content_parts.is_empty() {
        messages.push(ChatMessage::user(collapse_content_parts(content_parts)));
    }

    // If nothing was produced (empty message), emit an empty user message
    if messages.is_empty() {
        messages.push(ChatMessage::user(ChatContent::Text(String::new())));
    }

    messages
}

fn translate_assistant_message(blocks: &[ContentBlock]) -> ChatMessage {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                text_parts.push(text);
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: serialize_tool_input(input, MAX_TOOL_ARGUMENT_BYTES),
                    },
                });
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. } => {}
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.concat())
    };

    ChatMessage::assistant(content, tool_calls)
}

fn collapse_content_parts(parts: Vec<ContentPart>) -> ChatContent {
    if let [ContentPart::Text { text }] = parts.as_slice() {
        return ChatContent::Text(text.clone());
    }
    ChatContent::Parts(parts)
}

/// Serialize tool arguments, capped at `cap` bytes.
///
/// Over the cap, oversized top-level fields are replaced by a marker; if that
/// still does not fit the arguments collapse to `{}`.
pub fn serialize_tool_input(input: &Value, cap: usize) -> String {
    let serialized = serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string());
    if serialized.len() <= cap {
        return serialized;
    }

    if let Value::Object(map) = input {
        let shrunk: serde_json::Map<String, Value> = map
            .iter()
            .map(|(key, value)| {
                let size = serde_json::to_vec(value).map_or(0, |v| v.len());
                if size > MAX_TOOL_FIELD_BYTES {
                    (key.clone(), Value::String(format!("[truncated: {size} bytes]")))
                } else {
                    (key.clone(), value.clone())
                }
            })
            .collect();

        if let Ok(s) = serde_json::to_string(&shrunk) {
            if s.len() <= cap {
                tracing::warn!(
                    original = serialized.len(),
                    shrunk = s.len(),
                    "Truncated oversized tool input fields"
                );
                return s;
            }
        }
    }

    tracing::warn!(
        size = serialized.len(),
        cap,
        "Tool input too large even after truncation, sending empty object"
    );
    "{}".to_string()
}

fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) {
        "ERROR: "
    } else {
        ""
    };

    let text = match content {
        Some(ToolResultContent::Text(t)) => t.clone(),
        Some(ToolResultContent::Blocks(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                Value::Object(obj) => match obj.get("text") {
                    Some(Value::String(t)) => t.clone(),
                    _ => item.to_string(),
                },
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        Some(ToolResultContent::Object(value)) => match value.get("type") {
            Some(Value::String(t)) if t == "text" => value
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => value.to_string(),
        },
        None => "No content provided".to_string(),
    };

    format!("{prefix}{text}")
}

/// Make sure every assistant tool call is answered by a `tool` message in the
/// run of tool messages right after it, inserting placeholders where the caller
/// left a call unanswered.
pub fn reconcile_tool_results(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len());
    let mut iter = messages.into_iter().peekable();

    while let Some(msg) = iter.next() {
        let call_ids: Vec<String> = msg
            .tool_calls
            .as_ref()
            .filter(|_| msg.role == ChatRole::Assistant)
            .map(|calls| calls.iter().map(|c| c.id.clone()).collect())
            .unwrap_or_default();
        out.push(msg);

        if call_ids.is_empty() {
            continue;
        }

        let mut answered = HashSet::new();
        while let Some(next) = iter.next_if(|m| m.role == ChatRole::Tool) {
            if let Some(ref id) = next.tool_call_id {
                answered.insert(id.clone());
            }
            out.push(next);
        }

        for id in call_ids {
            if !answered.contains(&id) {
                tracing::debug!(tool_call_id = %id, "Synthesizing missing tool result");
                out.push(ChatMessage::tool(id, MISSING_TOOL_RESULT));
            }
        }
    }

    out
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto(ToolChoiceAuto { choice_type }) => match choice_type.as_str() {
            "any" => ChatToolChoice::String("required".to_string()),
            "none" => ChatToolChoice::String("none".to_string()),
            _ => ChatToolChoice::String("auto".to_string()),
        },
        ToolChoice::Specific(ToolChoiceSpecific { name, .. }) => {
            ChatToolChoice::Specific(ChatToolChoiceSpecific {
                choice_type: "function".to_string(),
                function: ChatToolChoiceFunction { name: name.clone() },
            })
        }
    }
}
