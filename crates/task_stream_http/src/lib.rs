//! HTTP transport for the task-event client.
//!
//! Implements [`task_stream::TaskApi`] (start, respond, cancel as JSON POSTs)
//! and [`task_stream::Transport`] (a `text/event-stream` GET whose `data:`
//! payloads become raw frames) on top of reqwest. Frame decoding, aggregation
//! and reconnect policy stay in the core crate.

pub mod client;
pub mod config;
pub mod error;
pub mod payload;
pub mod sse;
pub mod url;

pub use client::HttpTaskClient;
pub use config::HttpTaskConfig;
pub use error::{parse_error_message, HttpTaskError};
pub use payload::{CancelRequest, RespondRequest, StartResponse};
pub use sse::SseFrameParser;
pub use url::{endpoint_url, events_url, DEFAULT_BASE_URL};
