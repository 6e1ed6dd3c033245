//! Wire events pushed by the task server and the per-frame decoder.
//!
//! Every frame carries one JSON object whose `content` shape depends on
//! `event_type`. [`decode_frame`] validates both layers so the rest of the
//! pipeline only sees typed payloads.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// Free-form key/value bag attached to events and messages.
pub type Metadata = Map<String, Value>;

/// Discriminant of a protocol event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Stream,
    Result,
    AskUser,
    UserResponse,
    Error,
    Completion,
    /// Any `event_type` this client does not understand.
    #[serde(other)]
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "STREAM",
            Self::Result => "RESULT",
            Self::AskUser => "ASK_USER",
            Self::UserResponse => "USER_RESPONSE",
            Self::Error => "ERROR",
            Self::Completion => "COMPLETION",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// ERROR and COMPLETION end a run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error | Self::Completion)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event exactly as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProtocolEvent {
    pub event_id: String,
    pub event_type: EventKind,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Thinking,
    #[default]
    Content,
    Complete,
}

/// Incremental text chunk belonging to a stream run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamContent {
    #[serde(default)]
    pub state: StreamState,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub is_thinking: bool,
    /// Set for code chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Structured or plain result; see [`crate::normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultContent {
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskUserContent {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_option: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponseContent {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContent {
    #[serde(default)]
    pub error_code: Value,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl ErrorContent {
    /// `details` as message metadata. A non-object value is kept under `details`.
    pub fn details_metadata(&self) -> Option<Metadata> {
        match &self.details {
            Value::Null => None,
            Value::Object(details) => Some(details.clone()),
            other => {
                let mut metadata = Metadata::new();
                metadata.insert("details".to_owned(), other.clone());
                Some(metadata)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionContent {
    #[serde(default)]
    pub success_code: Value,
    #[serde(default)]
    pub success_message: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub completion_time: Value,
}

impl CompletionContent {
    /// `result.summary` when the producer attached one.
    pub fn result_summary(&self) -> Option<&str> {
        self.result.get("summary").and_then(Value::as_str)
    }
}

/// Typed content of a decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Stream(StreamContent),
    Result(ResultContent),
    AskUser(AskUserContent),
    UserResponse(UserResponseContent),
    Error(ErrorContent),
    Completion(CompletionContent),
    Unknown(Value),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Stream(_) => EventKind::Stream,
            Self::Result(_) => EventKind::Result,
            Self::AskUser(_) => EventKind::AskUser,
            Self::UserResponse(_) => EventKind::UserResponse,
            Self::Error(_) => EventKind::Error,
            Self::Completion(_) => EventKind::Completion,
            Self::Unknown(_) => EventKind::Unknown,
        }
    }
}

/// A decoded, immutable protocol event.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub event_id: String,
    pub timestamp: f64,
    pub response_to: Option<String>,
    pub metadata: Option<Metadata>,
    pub payload: EventPayload,
}

impl TaskEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

impl TryFrom<RawProtocolEvent> for TaskEvent {
    type Error = DecodeError;

    fn try_from(raw: RawProtocolEvent) -> Result<Self, Self::Error> {
        let RawProtocolEvent {
            event_id,
            event_type,
            timestamp,
            content,
            response_to,
            metadata,
        } = raw;

        let payload = match event_type {
            EventKind::Stream => EventPayload::Stream(typed_content(event_type, &event_id, content)?),
            EventKind::Result => EventPayload::Result(typed_content(event_type, &event_id, content)?),
            EventKind::AskUser => {
                EventPayload::AskUser(typed_content(event_type, &event_id, content)?)
            }
            EventKind::UserResponse => {
                EventPayload::UserResponse(typed_content(event_type, &event_id, content)?)
            }
            EventKind::Error => EventPayload::Error(typed_content(event_type, &event_id, content)?),
            EventKind::Completion => {
                EventPayload::Completion(typed_content(event_type, &event_id, content)?)
            }
            EventKind::Unknown => EventPayload::Unknown(content),
        };

        Ok(Self {
            event_id,
            timestamp,
            response_to,
            metadata,
            payload,
        })
    }
}

fn typed_content<T: DeserializeOwned>(
    kind: EventKind,
    event_id: &str,
    content: Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(content).map_err(|source| DecodeError::Content {
        kind,
        event_id: event_id.to_owned(),
        source,
    })
}

/// Decode one pushed frame into a typed event.
pub fn decode_frame(frame: &str) -> Result<TaskEvent, DecodeError> {
    let raw: RawProtocolEvent = serde_json::from_str(frame).map_err(DecodeError::Frame)?;
    TaskEvent::try_from(raw)
}
