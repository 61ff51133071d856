//! Classification of agent JSON output into typed events

use serde_json::{Map, Value};

use crate::types::events::EventPayload;
use crate::types::identifiers::AgentThreadId;

/// Classify one parsed JSON object into zero or more typed payloads
///
/// `original` is the text the object was parsed from; it is carried into
/// `raw-output` events for unrecognized shapes. A single `assistant` message
/// may yield several payloads, one per content block. The returned list is
/// never empty.
///
/// # Arguments
/// * `value` - Parsed JSON, optionally wrapped as `{session_id, event}`
/// * `original` - Source text of the object
#[must_use]
pub fn classify(value: Value, original: &str) -> Vec<EventPayload> {
    let value = unwrap_envelope(value);

    let payloads = match value.get("type").and_then(Value::as_str) {
        Some("assistant") => assistant_blocks(&value),
        Some("user") => tool_results(&value),
        Some("result") => vec![session_result(&value)],
        Some("error") => vec![error_payload(&value)],
        _ => Vec::new(),
    };

    if payloads.is_empty() {
        return vec![EventPayload::RawOutput {
            content: original.to_string(),
            data: Some(value),
        }];
    }
    payloads
}

/// Strip one level of `{ "session_id": ..., "event": {...} }` wrapping
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map)
            if map.contains_key("session_id")
                && map.get("event").is_some_and(Value::is_object) =>
        {
            map.remove("event").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn content_blocks(value: &Value) -> Option<&Value> {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| value.get("content"))
}

fn assistant_blocks(value: &Value) -> Vec<EventPayload> {
    let message_id = value
        .get("message")
        .and_then(|m| m.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    match content_blocks(value) {
        Some(Value::String(text)) => vec![EventPayload::AssistantMessageDelta {
            text: text.clone(),
            message_id,
            is_thinking: false,
        }],
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| {
                let block = block.as_object()?;
                match block.get("type").and_then(Value::as_str)? {
                    "text" => Some(EventPayload::AssistantMessageDelta {
                        text: string_field(block, "text")?,
                        message_id: message_id.clone(),
                        is_thinking: false,
                    }),
                    "thinking" => Some(EventPayload::AssistantMessageDelta {
                        text: string_field(block, "thinking")?,
                        message_id: message_id.clone(),
                        is_thinking: true,
                    }),
                    "tool_use" => Some(EventPayload::ToolUse {
                        id: string_field(block, "id").unwrap_or_default(),
                        name: string_field(block, "name").unwrap_or_default(),
                        input: block.get("input").cloned().unwrap_or(Value::Null),
                    }),
                    _ => None,
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn tool_results(value: &Value) -> Vec<EventPayload> {
    let Some(Value::Array(blocks)) = content_blocks(value) else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter_map(|block| {
            let block = block.as_object()?;
            if block.get("type").and_then(Value::as_str)? != "tool_result" {
                return None;
            }
            Some(EventPayload::ToolResult {
                tool_use_id: string_field(block, "tool_use_id").unwrap_or_default(),
                content: block.get("content").cloned().unwrap_or(Value::Null),
                is_error: block
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        })
        .collect()
}

fn session_result(value: &Value) -> EventPayload {
    let map = value.as_object();
    let get_str = |key: &str| map.and_then(|m| string_field(m, key));

    EventPayload::SessionResult {
        thread_id: get_str("thread_id")
            .or_else(|| get_str("session_id"))
            .map(AgentThreadId::from),
        is_error: value
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        subtype: get_str("subtype"),
        result: get_str("result").or_else(|| get_str("error")),
        duration_ms: value.get("duration_ms").and_then(Value::as_u64),
        num_turns: value
            .get("num_turns")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok()),
        usage: value.get("usage").cloned(),
    }
}

fn error_payload(value: &Value) -> EventPayload {
    let content = ["message", "error"]
        .iter()
        .find_map(|key| match value.get(*key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Object(inner)) => string_field(inner, "message"),
            _ => None,
        })
        .unwrap_or_else(|| value.to_string());
    EventPayload::ErrorOutput { content }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}
