//! Streaming event types
//!
//! Every unit of agent output is decoded into a [`StreamingEvent`] at the
//! extractor boundary. Nothing downstream of the extractor sees raw JSON
//! except through [`EventPayload::RawOutput::data`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::connection::ConnectionMode;
use super::identifiers::AgentThreadId;

/// One decoded unit of process output
///
/// Serializes as `{"kind": "...", "payload": {...}, "timestamp": ms}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingEvent {
    /// Tagged payload
    #[serde(flatten)]
    pub payload: EventPayload,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl StreamingEvent {
    /// Wrap a payload with the current wall-clock time
    #[must_use]
    pub fn now(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Wire name of the event kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Agent thread identifier carried by a session result, if any
    #[must_use]
    pub fn thread_id(&self) -> Option<&AgentThreadId> {
        match &self.payload {
            EventPayload::SessionResult { thread_id, .. } => thread_id.as_ref(),
            _ => None,
        }
    }
}

/// The closed set of event kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum EventPayload {
    /// Connection state, emitted around every authentication probe
    ConnectionInfo {
        /// Resolved mode
        mode: ConnectionMode,
        /// Human-readable description
        description: String,
        /// Outcome of the most recent probe
        authenticated: bool,
        /// Whether the mode requires CLI authentication at all
        auth_required: bool,
        /// Agent version reported by the probe
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },

    /// Text produced by the assistant
    AssistantMessageDelta {
        /// Text content
        text: String,
        /// Upstream message id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        /// True for reasoning blocks
        #[serde(default)]
        is_thinking: bool,
    },

    /// The assistant invoked a tool
    ToolUse {
        /// Tool-use id
        id: String,
        /// Tool name
        name: String,
        /// Tool input
        input: Value,
    },

    /// A tool returned
    ToolResult {
        /// Id of the originating tool-use block
        tool_use_id: String,
        /// Result content
        content: Value,
        /// Whether the tool reported failure
        #[serde(default)]
        is_error: bool,
    },

    /// Final outcome of a turn
    SessionResult {
        /// Agent thread identifier for continuation
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<AgentThreadId>,
        /// Whether the agent reported an error
        #[serde(default)]
        is_error: bool,
        /// Result subtype (e.g. `success`, `error_during_execution`)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtype: Option<String>,
        /// Final result text
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        /// Wall-clock duration reported by the agent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        /// Number of turns reported by the agent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        num_turns: Option<u32>,
        /// Token usage, passed through untouched
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Value>,
    },

    /// Unparsed or unrecognized stdout output
    RawOutput {
        /// Original text of the line
        content: String,
        /// Parsed JSON when the line was valid JSON of an unrecognized type
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// Stderr output or an agent-reported error
    ErrorOutput {
        /// Error text with terminal escapes removed
        content: String,
    },

    /// An authentication failure was detected
    AuthError {
        /// Error text
        message: String,
    },
}

impl EventPayload {
    /// Wire name of the variant
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionInfo { .. } => "connection-info",
            Self::AssistantMessageDelta { .. } => "assistant-message-delta",
            Self::ToolUse { .. } => "tool-use",
            Self::ToolResult { .. } => "tool-result",
            Self::SessionResult { .. } => "session-result",
            Self::RawOutput { .. } => "raw-output",
            Self::ErrorOutput { .. } => "error-output",
            Self::AuthError { .. } => "auth-error",
        }
    }

    /// Raw-output payload for a line that could not be parsed
    pub fn raw(content: impl Into<String>) -> Self {
        Self::RawOutput {
            content: content.into(),
            data: None,
        }
    }

    /// Error-output payload
    pub fn error_output(content: impl Into<String>) -> Self {
        Self::ErrorOutput {
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_kind_payload_timestamp() {
        let event = StreamingEvent {
            payload: EventPayload::raw("hello"),
            timestamp: 42,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"kind": "raw-output", "payload": {"content": "hello"}, "timestamp": 42})
        );
        assert_eq!(event.kind(), "raw-output");
    }
}
