//! Seams between the core and whatever carries requests and pushed frames.
//!
//! The HTTP/SSE implementation lives in `task_stream_http`; tests and offline
//! demos use the scripted one from `task_stream_mock`.

use std::fmt;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, TransportError};

/// Opaque id of one task run on the server (`event_file_id` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamHandle(String);

impl StreamHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Command payload that launches a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_conversation_history: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel_id: Option<String>,
}

impl StartRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            include_conversation_history: None,
            panel_id: None,
        }
    }

    pub fn with_conversation_history(mut self, include: bool) -> Self {
        self.include_conversation_history = Some(include);
        self
    }

    pub fn with_panel_id(mut self, panel_id: impl Into<String>) -> Self {
        self.panel_id = Some(panel_id.into());
        self
    }
}

/// Raw frames of one open connection. The stream ending means the remote closed it.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// Server-push receiver. Dropping the returned stream closes the connection.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, handle: &StreamHandle) -> BoxFuture<'static, Result<FrameStream, TransportError>>;
}

/// Request/response side of the task protocol.
pub trait TaskApi: Send + Sync + 'static {
    fn start(&self, request: StartRequest) -> BoxFuture<'static, Result<StreamHandle, ApiError>>;

    fn respond(
        &self,
        handle: &StreamHandle,
        event_id: &str,
        response: &str,
    ) -> BoxFuture<'static, Result<(), ApiError>>;

    fn cancel(&self, handle: &StreamHandle) -> BoxFuture<'static, Result<(), ApiError>>;
}
