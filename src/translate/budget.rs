//! Keep outbound requests under a byte ceiling.
//!
//! Whole messages are dropped oldest-first; nothing is truncated in place.

use tracing::warn;

use super::openai_types::{ChatCompletionRequest, ChatMessage, ChatRole};

/// Default ceiling for the serialized outbound request.
pub const DEFAULT_REQUEST_BUDGET_BYTES: usize = 800_000;

const TRUNCATION_MARKER: &str = "\n[truncated]";

fn json_len<T: serde::Serialize>(value: &T) -> usize {
    serde_json::to_vec(value).map_or(0, |v| v.len())
}

/// Cut `text` to at most `max_bytes` (marker included), on a char boundary.
pub fn truncate_text(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut cut = max_bytes.saturating_sub(TRUNCATION_MARKER.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{}{TRUNCATION_MARKER}", &text[..cut])
}

/// Drop old messages until the serialized request fits in `budget` bytes.
///
/// A leading system message is kept whenever it fits on its own. The rest of
/// the list is walked newest to oldest and the walk stops at the first
/// message that would overflow, so the result is always a suffix.
pub fn enforce_budget(mut req: ChatCompletionRequest, budget: usize) -> ChatCompletionRequest {
    let messages = std::mem::take(&mut req.messages);
    let original_count = messages.len();

    // `[]` is already part of the skeleton; each message adds its body plus a comma.
    let mut used = json_len(&req);

    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if first.role == ChatRole::System => (Some(first.clone()), rest),
        _ => (None, messages.as_slice()),
    };

    let mut kept_system = None;
    if let Some(sys) = system {
        let size = json_len(&sys) + 1;
        if used + size <= budget {
            used += size;
            kept_system = Some(sys);
        } else {
            warn!(size, budget, "System message alone exceeds the request budget, dropping it");
        }
    }

    let mut start = rest.len();
    for (i, msg) in rest.iter().enumerate().rev() {
        let size = json_len(msg) + 1;
        if used + size > budget {
            break;
        }
        used += size;
        start = i;
    }

    // Tool results whose assistant turn was cut would be rejected upstream.
    while start < rest.len() && rest[start].role == ChatRole::Tool {
        start += 1;
    }

    let mut kept: Vec<ChatMessage> = Vec::with_capacity(rest.len() - start + 1);
    kept.extend(kept_system);
    kept.extend_from_slice(&rest[start..]);

    if kept.len() < original_count {
        warn!(
            dropped = original_count - kept.len(),
            kept = kept.len(),
            budget,
            "Request exceeded byte budget, dropped oldest messages"
        );
    }

    req.messages = kept;
    req
}
