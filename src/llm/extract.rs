//! Best-effort text extraction from completion responses
//!
//! The provider may answer in several envelopes depending on which API served
//! the request (Chat Completions, Responses, or a proxy that flattens either).
//! Extraction walks an ordered list of extractors and returns the first
//! non-empty text.

use serde_json::Value;

type Extractor = fn(&Value) -> Option<String>;

/// Ordered extractor chain; new envelopes are added here.
const EXTRACTORS: &[(&str, Extractor)] = &[
    ("choices.message.content", chat_message_content),
    ("output_text", output_text),
    ("output.content.text", responses_output_items),
    ("text.content", text_content),
    ("text", text_string),
    ("content", content_string),
];

/// Text payload plus the envelope it was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub shape: &'static str,
}

pub fn extract_text(body: &Value) -> Option<ExtractedText> {
    EXTRACTORS.iter().find_map(|(shape, extractor)| {
        extractor(body)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .map(|text| ExtractedText { text, shape })
    })
}

/// Top-level keys of a response, for logging when nothing matched.
pub fn describe_keys(body: &Value) -> String {
    match body.as_object() {
        Some(map) => map.keys().cloned().collect::<Vec<_>>().join(", "),
        None => "<non-object response>".to_string(),
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn chat_message_content(body: &Value) -> Option<String> {
    let content = body.get("choices")?.get(0)?.get("message")?.get("content")?;
    match content {
        Value::String(_) => non_empty_str(Some(content)),
        // Some gateways return content parts instead of a flat string.
        Value::Array(parts) => join_parts(parts.iter().filter_map(|p| p.get("text"))),
        _ => None,
    }
}

fn output_text(body: &Value) -> Option<String> {
    non_empty_str(body.get("output_text"))
}

fn responses_output_items(body: &Value) -> Option<String> {
    let items = body.get("output")?.as_array()?;
    let texts = items
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) != Some("reasoning"))
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter_map(|part| part.get("text"));
    join_parts(texts)
}

fn text_content(body: &Value) -> Option<String> {
    non_empty_str(body.get("text")?.get("content"))
}

fn text_string(body: &Value) -> Option<String> {
    non_empty_str(body.get("text"))
}

fn content_string(body: &Value) -> Option<String> {
    non_empty_str(body.get("content"))
}

fn join_parts<'a>(parts: impl Iterator<Item = &'a Value>) -> Option<String> {
    let joined = parts
        .filter_map(Value::as_str)
        .collect::<Vec<_>>()
        .join("");
    if joined.trim().is_empty() {
        None
    } else {
        Some(joined)
    }
}
