//! Translate an OpenAI chat-completion stream into Claude SSE events.
//!
//! The [`StreamTranslator`] processes OpenAI `ChatCompletionChunk`s one at a time,
//! keeping the per-request state (open tool calls, output token count, stop reason)
//! and emitting the corresponding Claude stream events. Block 0 is always the text
//! block; each tool call gets the next index once both its id and name are known.
//!
//! [`translate_chunk_stream`] and [`translate_byte_stream`] wrap the translator into
//! lazy streams of [`SseEvent`]s, one for already-decoded chunks and one for a raw
//! `text/event-stream` body. Both produce the same events for the same content.

use std::collections::HashMap;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use tracing::{debug, warn};

use super::anthropic_types::{
    Delta, DeltaUsage, ErrorBody, MessageDeltaBody, MessagesResponse, ResponseContentBlock,
    StopReason, StreamEvent, Usage,
};
use super::openai_types::{ChatCompletionChunk, ChunkToolCall};
use super::response::{generate_message_id, map_finish_reason};
use crate::classify::classify_error_message;
use crate::error::{ProxyError, Result};

const TEXT_BLOCK_INDEX: usize = 0;

/// One server-sent event, ready to be written as `event: <event>\ndata: <data>\n\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl SseEvent {
    /// Terminal sentinel appended by the HTTP layer after the converter's events.
    pub fn done() -> Self {
        Self {
            event: "done".to_string(),
            data: "[DONE]".to_string(),
        }
    }

    pub fn to_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

impl From<&StreamEvent> for SseEvent {
    fn from(event: &StreamEvent) -> Self {
        Self {
            event: event.event_name().to_string(),
            data: serde_json::to_string(event).unwrap_or_default(),
        }
    }
}

/// A lazy stream of Claude SSE events for one request.
pub type SseStream = Pin<Box<dyn Stream<Item = SseEvent> + Send>>;

/// A tool call being assembled from fragments.
#[derive(Debug, Default)]
struct ToolCallState {
    id: Option<String>,
    name: Option<String>,
    args_buffer: String,
    json_sent: bool,
    block_index: usize,
    started: bool,
}

/// State machine that translates OpenAI streaming chunks into Claude SSE events.
///
/// Usage:
///   let mut translator = StreamTranslator::new("claude-sonnet-4-20250514");
///   let mut events = translator.start();
///   for chunk in openai_chunks {
///       events.extend(translator.process_chunk(&chunk));
///       if translator.is_finished() { break; }
///   }
///   events.extend(translator.finish());
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    msg_id: String,
    finished: bool,
    output_tokens: u64,
    stop_reason: StopReason,
    tool_calls: HashMap<u64, ToolCallState>,
    tool_block_count: usize,
    started_blocks: Vec<usize>,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: generate_message_id(),
            finished: false,
            output_tokens: 0,
            stop_reason: StopReason::EndTurn,
            tool_calls: HashMap::new(),
            tool_block_count: 0,
            started_blocks: Vec::new(),
        }
    }

    /// Events sent before any provider data arrives.
    pub fn start(&self) -> Vec<StreamEvent> {
        vec![
            self.make_message_start(),
            StreamEvent::ContentBlockStart {
                index: TEXT_BLOCK_INDEX,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            },
            StreamEvent::Ping,
        ]
    }

    /// Whether a finish reason has been seen; later chunks are ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Process a single OpenAI streaming chunk, returning zero or more Claude SSE events.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        if let Some(text) = choice.delta.content.as_deref().filter(|s| !s.is_empty()) {
            self.output_tokens += 1;
            events.push(StreamEvent::ContentBlockDelta {
                index: TEXT_BLOCK_INDEX,
                delta: Delta::TextDelta {
                    text: text.to_string(),
                },
            });
        }

        if let Some(ref tool_calls) = choice.delta.tool_calls {
            for tc in tool_calls {
                self.process_tool_call(tc, &mut events);
            }
        }

        if let Some(ref reason) = choice.finish_reason {
            self.stop_reason = map_finish_reason(reason);
            self.finished = true;
        }

        events
    }

    fn process_tool_call(&mut self, tc: &ChunkToolCall, events: &mut Vec<StreamEvent>) {
        let state = self.tool_calls.entry(tc.index).or_default();

        if let Some(ref id) = tc.id {
            state.id = Some(id.clone());
        }
        if let Some(name) = tc.function.as_ref().and_then(|f| f.name.as_ref()) {
            state.name = Some(name.clone());
        }

        if !state.started {
            if let (Some(id), Some(name)) = (&state.id, &state.name) {
                self.tool_block_count += 1;
                state.block_index = TEXT_BLOCK_INDEX + self.tool_block_count;
                state.started = true;
                self.started_blocks.push(state.block_index);

                events.push(StreamEvent::ContentBlockStart {
                    index: state.block_index,
                    content_block: ResponseContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                });
            }
        }

        if let Some(args) = tc.function.as_ref().and_then(|f| f.arguments.as_ref()) {
            state.args_buffer.push_str(args);
        }

        // Intermediate buffers are usually not valid JSON yet; the arguments
        // go out once, the first time the whole buffer parses.
        if state.started
            && !state.json_sent
            && !state.args_buffer.is_empty()
            && serde_json::from_str::<serde_json::Value>(&state.args_buffer).is_ok()
        {
            state.json_sent = true;
            events.push(StreamEvent::ContentBlockDelta {
                index: state.block_index,
                delta: Delta::InputJsonDelta {
                    partial_json: state.args_buffer.clone(),
                },
            });
        }
    }

    /// Close every open block and end the message.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        self.finished = true;

        let mut events = vec![StreamEvent::ContentBlockStop {
            index: TEXT_BLOCK_INDEX,
        }];

        for &index in &self.started_blocks {
            events.push(StreamEvent::ContentBlockStop { index });
        }

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: self.stop_reason,
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);

        events
    }

    fn make_message_start(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.msg_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
        }
    }
}

/// Translate a stream of decoded chunks into Claude SSE events.
///
/// Consumption stops at the first finish reason or error, and the source
/// stream is dropped as soon as it is no longer needed. An error replaces the
/// closing events with a single `error` event.
pub fn translate_chunk_stream<S>(
    chunks: S,
    model: String,
) -> impl Stream<Item = SseEvent> + Send + 'static
where
    S: Stream<Item = Result<ChatCompletionChunk>> + Send + 'static,
{
    async_stream::stream! {
        let mut translator = StreamTranslator::new(&model);
        for event in translator.start() {
            yield SseEvent::from(&event);
        }

        let mut chunks = Box::pin(chunks);
        let mut failure = None;

        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    for event in translator.process_chunk(&chunk) {
                        yield SseEvent::from(&event);
                    }
                    if translator.is_finished() {
                        break;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        drop(chunks);

        if let Some(e) = failure {
            warn!(error = %e, "Stream failed");
            let error = StreamEvent::Error {
                error: ErrorBody::api_error(classify_error_message(&e.to_string())),
            };
            yield SseEvent::from(&error);
        } else {
            for event in translator.finish() {
                yield SseEvent::from(&event);
            }
            debug!(
                output_tokens = translator.output_tokens,
                stop_reason = ?translator.stop_reason,
                "Stream completed"
            );
        }
    }
}

/// Decode a raw `text/event-stream` body into chunks, ending at `[DONE]`.
///
/// Chunks that are not valid JSON are skipped; framing and transport failures
/// end the stream with an error.
pub fn decode_sse_chunks<S, E>(bytes: S) -> impl Stream<Item = Result<ChatCompletionChunk>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut events = Box::pin(bytes.eventsource());

        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    let data = event.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        break;
                    }
                    match serde_json::from_str::<ChatCompletionChunk>(data) {
                        Ok(chunk) => yield Ok(chunk),
                        Err(e) => warn!(error = %e, "Skipping unparseable stream chunk"),
                    }
                }
                Err(e) => {
                    yield Err(ProxyError::stream(e.to_string()));
                    break;
                }
            }
        }
    }
}

/// Translate a raw provider SSE body into Claude SSE events.
pub fn translate_byte_stream<S, E>(bytes: S, model: String) -> impl Stream<Item = SseEvent> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    translate_chunk_stream(decode_sse_chunks(bytes), model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::*;
    use futures::stream;

    fn text_chunk(content: &str, finish: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "c1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "test".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: Some(content.to_string()),
                    tool_calls: None,
                },
                finish_reason: finish.map(String::from),
            }],
            usage: None,
        }
    }

    fn tool_chunk(
        index: u64,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    tool_calls: Some(vec![ChunkToolCall {
                        index,
                        id: id.map(String::from),
                        call_type: id.map(|_| "function".to_string()),
                        function: Some(ChunkToolCallFunction {
                            name: name.map(String::from),
                            arguments: arguments.map(String::from),
                        }),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            ..Default::default()
        }
    }

    fn finish_chunk(reason: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            choices: vec![ChunkChoice {
                finish_reason: Some(reason.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn run(chunks: Vec<ChatCompletionChunk>) -> Vec<SseEvent> {
        let source = stream::iter(chunks.into_iter().map(Ok));
        tokio_test::block_on(translate_chunk_stream(source, "claude-test".to_string()).collect())
    }

    fn names(events: &[SseEvent]) -> Vec<&str> {
        events.iter().map(|e| e.event.as_str()).collect()
    }

    fn data(event: &SseEvent) -> serde_json::Value {
        serde_json::from_str(&event.data).unwrap()
    }

    #[test]
    fn test_start_events() {
        let translator = StreamTranslator::new("test-model");
        let events = translator.start();
        let names: Vec<&str> = events.iter().map(StreamEvent::event_name).collect();
        assert_eq!(names, ["message_start", "content_block_start", "ping"]);
    }

    #[test]
    fn test_simple_text_stream() {
        let events = run(vec![
            text_chunk("Hello", None),
            text_chunk(" world", None),
            text_chunk("", Some("stop")),
        ]);

        assert_eq!(
            names(&events),
            [
                "message_start",
                "content_block_start",
                "ping",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let start = data(&events[0]);
        assert_eq!(start["message"]["model"], "claude-test");
        assert_eq!(start["message"]["usage"]["input_tokens"], 0);
        assert_eq!(start["message"]["content"], serde_json::json!([]));

        assert_eq!(data(&events[3])["delta"]["text"], "Hello");
        assert_eq!(data(&events[3])["index"], 0);

        let delta = data(&events[6]);
        assert_eq!(delta["delta"]["stop_reason"], "end_turn");
        assert!(delta["delta"]["stop_sequence"].is_null());
        assert_eq!(delta["usage"]["output_tokens"], 2);
    }

    #[test]
    fn test_tool_arguments_sent_once_when_complete() {
        let events = run(vec![
            tool_chunk(0, Some("t1"), Some("f"), None),
            tool_chunk(0, None, None, Some("{\"a\"")),
            tool_chunk(0, None, None, Some(":")),
            tool_chunk(0, None, None, Some("1}")),
            finish_chunk("tool_calls"),
        ]);

        let tool_starts: Vec<_> = events
            .iter()
            .filter(|e| e.event == "content_block_start")
            .map(data)
            .filter(|d| d["content_block"]["type"] == "tool_use")
            .collect();
        assert_eq!(tool_starts.len(), 1);
        assert_eq!(tool_starts[0]["index"], 1);
        assert_eq!(tool_starts[0]["content_block"]["id"], "t1");
        assert_eq!(tool_starts[0]["content_block"]["name"], "f");
        assert_eq!(tool_starts[0]["content_block"]["input"], serde_json::json!({}));

        let json_deltas: Vec<_> = events
            .iter()
            .filter(|e| e.event == "content_block_delta")
            .map(data)
            .filter(|d| d["delta"]["type"] == "input_json_delta")
            .collect();
        assert_eq!(json_deltas.len(), 1);
        assert_eq!(json_deltas[0]["index"], 1);
        assert_eq!(json_deltas[0]["delta"]["partial_json"], "{\"a\":1}");

        let stops: Vec<_> = events
            .iter()
            .filter(|e| e.event == "content_block_stop")
            .map(|e| data(e)["index"].clone())
            .collect();
        assert_eq!(stops, [0, 1]);

        let message_delta = events.iter().find(|e| e.event == "message_delta").unwrap();
        assert_eq!(data(message_delta)["delta"]["stop_reason"], "tool_use");
    }

    #[test]
    fn test_tool_starts_only_after_id_and_name() {
        let mut translator = StreamTranslator::new("m");

        let events = translator.process_chunk(&tool_chunk(0, Some("t1"), None, Some("{}")));
        assert!(events.is_empty());

        let events = translator.process_chunk(&tool_chunk(0, None, Some("f"), None));
        let names: Vec<&str> = events.iter().map(StreamEvent::event_name).collect();
        // Buffer was already complete, so the arguments follow the start immediately.
        assert_eq!(names, ["content_block_start", "content_block_delta"]);

        let events = translator.process_chunk(&tool_chunk(0, None, None, Some(" ")));
        assert!(events.is_empty());
    }

    #[test]
    fn test_parallel_tool_calls_get_sequential_blocks() {
        let events = run(vec![
            text_chunk("Checking", None),
            tool_chunk(1, Some("b"), Some("second"), None),
            tool_chunk(0, Some("a"), Some("first"), None),
            tool_chunk(0, None, None, Some("{}")),
            tool_chunk(1, None, None, Some("{\"x\":true}")),
            finish_chunk("tool_calls"),
        ]);

        let starts: Vec<(serde_json::Value, serde_json::Value)> = events
            .iter()
            .filter(|e| e.event == "content_block_start")
            .map(data)
            .filter(|d| d["content_block"]["type"] == "tool_use")
            .map(|d| (d["index"].clone(), d["content_block"]["id"].clone()))
            .collect();
        assert_eq!(
            starts,
            [
                (serde_json::json!(1), serde_json::json!("b")),
                (serde_json::json!(2), serde_json::json!("a")),
            ]
        );

        let stops: Vec<_> = events
            .iter()
            .filter(|e| e.event == "content_block_stop")
            .map(|e| data(e)["index"].clone())
            .collect();
        assert_eq!(stops, [0, 1, 2]);
    }

    #[test]
    fn test_chunks_after_finish_are_ignored() {
        let events = run(vec![
            text_chunk("done", Some("length")),
            text_chunk("ignored", None),
        ]);

        let text_deltas = events
            .iter()
            .filter(|e| e.event == "content_block_delta")
            .count();
        assert_eq!(text_deltas, 1);

        let message_delta = events.iter().find(|e| e.event == "message_delta").unwrap();
        assert_eq!(data(message_delta)["delta"]["stop_reason"], "max_tokens");
    }

    #[test]
    fn test_stream_without_finish_reason_still_closes() {
        let events = run(vec![text_chunk("partial", None)]);
        assert_eq!(names(&events).last(), Some(&"message_stop"));
        let message_delta = events.iter().find(|e| e.event == "message_delta").unwrap();
        assert_eq!(data(message_delta)["delta"]["stop_reason"], "end_turn");
    }

    #[test]
    fn test_error_replaces_closing_events() {
        let source = stream::iter(vec![
            Ok(text_chunk("Hi", None)),
            Err(ProxyError::stream("connection reset by peer")),
            Ok(text_chunk("never", None)),
        ]);
        let events: Vec<SseEvent> = tokio_test::block_on(
            translate_chunk_stream(source, "m".to_string()).collect(),
        );

        assert_eq!(
            names(&events),
            ["message_start", "content_block_start", "ping", "content_block_delta", "error"]
        );
        let err = data(events.last().unwrap());
        assert_eq!(err["type"], "error");
        assert_eq!(err["error"]["type"], "api_error");
    }

    #[test]
    fn test_error_message_is_classified() {
        let source = stream::iter(vec![Err::<ChatCompletionChunk, _>(ProxyError::stream(
            "read timed out",
        ))]);
        let events: Vec<SseEvent> = tokio_test::block_on(
            translate_chunk_stream(source, "m".to_string()).collect(),
        );
        let err = data(events.last().unwrap());
        assert_eq!(
            err["error"]["message"],
            classify_error_message("read timed out")
        );
    }

    #[test]
    fn test_byte_stream_matches_chunk_stream() {
        let chunks = vec![
            text_chunk("Hel", None),
            text_chunk("lo", None),
            tool_chunk(0, Some("t1"), Some("f"), Some("{\"a\"")),
            tool_chunk(0, None, None, Some(":1}")),
            finish_chunk("tool_calls"),
        ];

        let mut body = String::new();
        for chunk in &chunks {
            body.push_str(&format!("data: {}\n\n", serde_json::to_string(chunk).unwrap()));
        }
        body.push_str("data: [DONE]\n\n");

        // Split the body at awkward places to exercise line reassembly.
        let bytes = body.into_bytes();
        let pieces: Vec<std::result::Result<Bytes, std::io::Error>> = bytes
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let from_bytes: Vec<SseEvent> = tokio_test::block_on(
            translate_byte_stream(stream::iter(pieces), "claude-test".to_string()).collect(),
        );
        let from_chunks = run(chunks);

        // Message ids are random; everything after message_start must match.
        assert_eq!(from_bytes.len(), from_chunks.len());
        assert_eq!(from_bytes[1..], from_chunks[1..]);
    }

    #[test]
    fn test_byte_stream_skips_garbage_and_stops_at_done() {
        let body = concat!(
            ": keep-alive\n\n",
            "data: {not json}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"after\"}}]}\n\n",
        );
        let source = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(
            body.as_bytes(),
        ))]);
        let events: Vec<SseEvent> = tokio_test::block_on(
            translate_byte_stream(source, "m".to_string()).collect(),
        );

        let texts: Vec<_> = events
            .iter()
            .filter(|e| e.event == "content_block_delta")
            .map(|e| data(e)["delta"]["text"].clone())
            .collect();
        assert_eq!(texts, ["ok"]);
        assert_eq!(names(&events).last(), Some(&"message_stop"));
    }

    #[test]
    fn test_frame_format() {
        let event = SseEvent::from(&StreamEvent::MessageStop);
        assert_eq!(
            event.to_frame(),
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"
        );
        assert_eq!(SseEvent::done().to_frame(), "event: done\ndata: [DONE]\n\n");
    }
}
