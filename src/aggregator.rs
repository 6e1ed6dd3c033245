//! Run-length and identity state machine that turns decoded events into
//! consumer-visible [`Message`]s.
//!
//! Consecutive STREAM events extend one message; every other event gets its
//! own message and closes any open stream run first.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::event::{
    AskUserContent, CompletionContent, ErrorContent, EventKind, EventPayload, Metadata,
    ResultContent, StreamContent, StreamState, TaskEvent, UserResponseContent,
};
use crate::message::{Message, MessageIdAllocator};
use crate::normalize::normalize_result;

#[derive(Debug)]
pub struct MessageAggregator {
    ids: Arc<MessageIdAllocator>,
    completion_prefers_result_summary: bool,
    last_event_type: Option<EventKind>,
    current_stream_message_id: Option<String>,
    pending: HashMap<String, Message>,
}

impl MessageAggregator {
    pub fn new(ids: Arc<MessageIdAllocator>) -> Self {
        Self {
            ids,
            completion_prefers_result_summary: false,
            last_event_type: None,
            current_stream_message_id: None,
            pending: HashMap::new(),
        }
    }

    /// Use `result.summary` as COMPLETION content when the producer sends one.
    pub fn with_completion_summary(mut self, prefer: bool) -> Self {
        self.completion_prefers_result_summary = prefer;
        self
    }

    pub fn last_event_type(&self) -> Option<EventKind> {
        self.last_event_type
    }

    pub fn current_stream_message_id(&self) -> Option<&str> {
        self.current_stream_message_id.as_deref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Apply one event and return the messages it produced, in emission order.
    pub fn apply(&mut self, event: TaskEvent) -> Vec<Message> {
        let kind = event.kind();
        let mut emitted = Vec::new();

        if kind != EventKind::Stream {
            if self.last_event_type == Some(EventKind::Stream) {
                if let Some(finalized) = self.finalize_current_stream() {
                    emitted.push(finalized);
                }
            }
            self.current_stream_message_id = None;
        }

        let TaskEvent {
            event_id,
            response_to,
            metadata,
            payload,
            ..
        } = event;

        match payload {
            EventPayload::Stream(content) => {
                let id = self.stream_message_id();
                emitted.push(self.apply_stream(id, event_id, metadata, content));
            }
            EventPayload::Result(content) => {
                emitted.push(self.result_message(event_id, metadata.as_ref(), &content));
            }
            EventPayload::AskUser(content) => {
                emitted.push(self.ask_user_message(event_id, content));
            }
            EventPayload::UserResponse(content) => {
                emitted.push(self.user_response_message(event_id, response_to, content));
            }
            EventPayload::Error(content) => {
                emitted.push(self.error_message(event_id, content));
            }
            EventPayload::Completion(content) => {
                emitted.push(self.completion_message(event_id, content));
            }
            EventPayload::Unknown(_) => {
                warn!(event_id = %event_id, "ignoring event with unknown event_type");
            }
        }

        self.last_event_type = Some(kind);
        emitted
    }

    /// Abandon all in-flight state. Returns the number of dropped partial messages.
    pub fn reset(&mut self) -> usize {
        let dropped = self.pending.len();
        if dropped > 0 {
            debug!(dropped, "abandoning partially streamed messages");
        }
        self.pending.clear();
        self.current_stream_message_id = None;
        self.last_event_type = None;
        dropped
    }

    fn stream_message_id(&mut self) -> String {
        if self.last_event_type == Some(EventKind::Stream) {
            if let Some(id) = &self.current_stream_message_id {
                return id.clone();
            }
        }
        let id = self.ids.allocate();
        self.current_stream_message_id = Some(id.clone());
        id
    }

    fn apply_stream(
        &mut self,
        id: String,
        event_id: String,
        metadata: Option<Metadata>,
        content: StreamContent,
    ) -> Message {
        let complete = content.state == StreamState::Complete;

        let mut message = match self.pending.remove(&id) {
            Some(mut existing) => {
                existing.content.push_str(&content.content);
                existing.is_thinking = content.is_thinking;
                existing
            }
            None => {
                let mut message = Message::new(id.clone(), EventKind::Stream, content.content, event_id);
                message.content_type = Some(content.content_type);
                message.is_thinking = content.is_thinking;
                message.language = content.language;
                message.metadata = metadata;
                message
            }
        };

        if complete {
            message.is_streaming = false;
            self.current_stream_message_id = None;
        } else {
            message.is_streaming = true;
            self.pending.insert(id, message.clone());
        }
        message
    }

    fn finalize_current_stream(&mut self) -> Option<Message> {
        let id = self.current_stream_message_id.as_ref()?;
        let mut message = self.pending.remove(id)?;
        message.is_streaming = false;
        message.is_thinking = false;
        Some(message)
    }

    fn result_message(
        &self,
        event_id: String,
        event_metadata: Option<&Metadata>,
        content: &ResultContent,
    ) -> Message {
        let normalized = normalize_result(content, event_metadata);
        let mut message = Message::new(
            self.ids.allocate(),
            EventKind::Result,
            normalized.flat_content,
            event_id,
        );
        message.content_type = Some(normalized.content_type);
        message.metadata = Some(normalized.metadata);
        message
    }

    fn ask_user_message(&self, event_id: String, content: AskUserContent) -> Message {
        let mut message = Message::new(self.ids.allocate(), EventKind::AskUser, content.prompt, event_id);
        message.options = content.options;
        message.response_required = content.required;
        message
    }

    fn user_response_message(
        &self,
        event_id: String,
        response_to: Option<String>,
        content: UserResponseContent,
    ) -> Message {
        let mut message = Message::new(
            self.ids.allocate(),
            EventKind::UserResponse,
            content.response,
            event_id,
        );
        message.is_user = true;
        message.response_to = response_to;
        message
    }

    fn error_message(&self, event_id: String, content: ErrorContent) -> Message {
        let metadata = content.details_metadata();
        let mut message = Message::new(
            self.ids.allocate(),
            EventKind::Error,
            content.error_message,
            event_id,
        );
        message.metadata = metadata;
        message
    }

    fn completion_message(&self, event_id: String, content: CompletionContent) -> Message {
        let text = match content.result_summary() {
            Some(summary) if self.completion_prefers_result_summary => summary.to_owned(),
            _ => content.success_message.clone(),
        };

        let mut metadata = Metadata::new();
        for (key, value) in [
            ("success_code", content.success_code),
            ("completion_time", content.completion_time),
            ("details", content.details),
            ("result", content.result),
        ] {
            if !value.is_null() {
                metadata.insert(key.to_owned(), value);
            }
        }
        if self.completion_prefers_result_summary {
            metadata.insert("isWrite".to_owned(), Value::Bool(true));
        }

        let mut message = Message::new(self.ids.allocate(), EventKind::Completion, text, event_id);
        message.metadata = Some(metadata);
        message
    }
}
