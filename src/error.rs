use thiserror::Error;

use crate::event::EventKind;

/// Boxed failure returned by [`crate::transport::TaskApi`] implementations.
pub type ApiError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A single pushed frame that could not be turned into a protocol event.
///
/// Decode failures are isolated to their frame: the run logs and drops it and
/// keeps reading.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not a valid protocol event: {0}")]
    Frame(#[source] serde_json::Error),

    #[error("{kind} event {event_id} has malformed content: {source}")]
    Content {
        kind: EventKind,
        event_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Recoverable failure of the push connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to open event stream: {0}")]
    Connect(String),

    #[error("event stream failed: {0}")]
    Stream(String),

    #[error("event stream was closed by the remote end")]
    Closed,
}

/// Surfaced once per run after the reconnect budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event stream unavailable after {attempts} reconnect attempts: {last_error}")]
pub struct TerminalConnectionError {
    pub attempts: u32,
    pub last_error: TransportError,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no active task run")]
    NoActiveRun,

    #[error("failed to start task: {0}")]
    Start(#[source] ApiError),

    #[error("failed to submit response for event '{event_id}': {source}")]
    Respond {
        event_id: String,
        #[source]
        source: ApiError,
    },

    #[error("cancel request was not acknowledged: {0}")]
    Cancel(#[source] ApiError),
}
