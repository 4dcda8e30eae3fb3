//! Turn raw destination-side failure messages into something a user can act on.

const INVALID_KEY: &str =
    "Invalid API key. Check the provider key configured for the bridge or sent with the request.";
const RATE_LIMITED: &str =
    "Rate limit exceeded. Wait and try again, or upgrade the provider plan.";
const MODEL_UNAVAILABLE: &str =
    "Model not found. Check the big/middle/small model names in the bridge configuration.";
const TOO_LONG: &str =
    "The conversation exceeds the model's maximum context length. Shorten it and retry.";
const TIMED_OUT: &str = "Request timed out waiting for the provider. Try again later.";

/// Patterns are checked in order; the first hit wins.
const RULES: &[(&[&str], &str)] = &[
    (&["invalid api key", "unauthorized"], INVALID_KEY),
    (&["quota exceeded", "rate limit"], RATE_LIMITED),
    (&["model not found", "model does not exist"], MODEL_UNAVAILABLE),
    (
        &["context_length_exceeded", "maximum context length"],
        TOO_LONG,
    ),
    (&["timeout", "timed out"], TIMED_OUT),
];

/// Map a raw error message to a canned user-facing message, or return it unchanged.
#[must_use]
pub fn classify_error_message(message: &str) -> String {
    let lowered = message.to_lowercase();

    RULES
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|p| lowered.contains(p)))
        .map_or_else(|| message.to_string(), |(_, canned)| (*canned).to_string())
}
