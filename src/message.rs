use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::event::{EventKind, Metadata};

/// Consumer-visible unit produced by [`crate::aggregator::MessageAggregator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub is_user: bool,
    #[serde(default)]
    pub is_thinking: bool,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to: Option<String>,
}

impl Message {
    /// Bare message of `kind` with every optional field unset.
    pub fn new(
        id: impl Into<String>,
        kind: EventKind,
        content: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            content_type: None,
            metadata: None,
            is_user: false,
            is_thinking: false,
            is_streaming: false,
            options: None,
            response_required: None,
            language: None,
            event_id: event_id.into(),
            response_to: None,
        }
    }

    /// True for the message that ends a run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// Allocates message ids of the form `{prefix}-{uuid}-{unix-millis}-{counter}`.
///
/// The counter is never reset, so ids stay unique for the allocator's lifetime
/// even across aggregator resets.
#[derive(Debug)]
pub struct MessageIdAllocator {
    prefix: String,
    next: AtomicU64,
}

impl MessageIdAllocator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn allocate(&self) -> String {
        let counter = self.next.fetch_add(1, Ordering::Relaxed);
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        format!("{}-{}-{millis}-{counter}", self.prefix, Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;

    #[test]
    fn allocated_ids_carry_prefix_and_are_unique() {
        let ids = MessageIdAllocator::new("coding");
        let allocated: Vec<String> = (0..64).map(|_| ids.allocate()).collect();

        assert!(allocated.iter().all(|id| id.starts_with("coding-")));
        assert!(allocated[0].ends_with("-0"));
        assert!(allocated[63].ends_with("-63"));
        let unique: HashSet<&String> = allocated.iter().collect();
        assert_eq!(unique.len(), allocated.len());
    }

    #[test]
    fn message_serializes_with_consumer_field_names() {
        let mut message = Message::new("msg-1", EventKind::AskUser, "Proceed?", "e7");
        message.options = Some(vec!["yes".to_owned(), "no".to_owned()]);
        message.response_required = Some(true);

        let value = serde_json::to_value(&message).expect("serialize message");
        assert_eq!(value["type"], json!("ASK_USER"));
        assert_eq!(value["eventId"], json!("e7"));
        assert_eq!(value["responseRequired"], json!(true));
        assert_eq!(value["isStreaming"], json!(false));
        assert!(value.get("responseTo").is_none());
    }
}
