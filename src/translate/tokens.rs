//! Rough token estimate for `/v1/messages/count_tokens`.
//!
//! Four characters per token over the system prompt and message text. Not a
//! tokenizer; callers only use it for context-window bookkeeping.

use super::anthropic_types::{
    ContentBlock, MessageContent, SystemBlock, SystemContent, TokenCountRequest,
    TokenCountResponse,
};

const CHARS_PER_TOKEN: usize = 4;

pub fn count_tokens(req: &TokenCountRequest) -> TokenCountResponse {
    let mut total_chars = match req.system {
        Some(SystemContent::Text(ref text)) => text.chars().count(),
        Some(SystemContent::Blocks(ref blocks)) => blocks
            .iter()
            .map(|SystemBlock::Text { text }| text.chars().count())
            .sum(),
        None => 0,
    };

    for msg in &req.messages {
        total_chars += match msg.content {
            MessageContent::Text(ref text) => text.chars().count(),
            MessageContent::Blocks(ref blocks) => blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => text.chars().count(),
                    _ => 0,
                })
                .sum(),
        };
    }

    TokenCountResponse {
        input_tokens: (total_chars / CHARS_PER_TOKEN).max(1) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::{Message, Role};

    fn request(system: &str, user: &str) -> TokenCountRequest {
        TokenCountRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            system: Some(SystemContent::Text(system.to_string())),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text(user.to_string()),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_small_input_counts_as_one() {
        assert_eq!(count_tokens(&request("ab", "abcd")).input_tokens, 1);
        assert_eq!(count_tokens(&request("", "")).input_tokens, 1);
    }

    #[test]
    fn test_four_chars_per_token() {
        let req = request("", &"x".repeat(4000));
        assert_eq!(count_tokens(&req).input_tokens, 1000);
    }

    #[test]
    fn test_blocks_count_text_only() {
        let req = TokenCountRequest {
            system: Some(SystemContent::Blocks(vec![
                SystemBlock::Text {
                    text: "aaaa".to_string(),
                },
                SystemBlock::Text {
                    text: "bbbb".to_string(),
                },
            ])),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![
                    ContentBlock::Text {
                        text: "cccccccc".to_string(),
                    },
                    ContentBlock::ToolUse {
                        id: "t".to_string(),
                        name: "n".to_string(),
                        input: serde_json::json!({"ignored": "x".repeat(100)}),
                    },
                ]),
            }],
            ..Default::default()
        };
        assert_eq!(count_tokens(&req).input_tokens, 4);
    }
}
