//! API translation between the Claude Messages and `OpenAI` Chat Completions formats.
//!
//! The core of the bridge: converts requests, responses, and streaming events
//! between the two API formats. Nothing in here does I/O beyond logging.

pub mod anthropic_types;
pub mod budget;
pub mod model_map;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
pub mod tokens;
