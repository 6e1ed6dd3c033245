use serde::{Deserialize, Serialize};

/// Body returned by the start endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub event_file_id: String,
}

/// Body of an ASK_USER answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondRequest {
    pub event_id: String,
    pub event_file_id: String,
    pub response: String,
}

impl RespondRequest {
    pub fn new(
        event_id: impl Into<String>,
        event_file_id: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_file_id: event_file_id.into(),
            response: response.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub event_file_id: String,
}

impl CancelRequest {
    pub fn new(event_file_id: impl Into<String>) -> Self {
        Self {
            event_file_id: event_file_id.into(),
        }
    }
}
