//! Streaming task-event client.
//!
//! Turns the server-pushed event sequence of a task run (incremental text,
//! structured results, user prompts, errors, completion) into an ordered set of
//! consumer-facing [`Message`]s, reconnecting a dropped stream a bounded number
//! of times and signalling task completion exactly once.
//!
//! # Public API Overview
//! - [`EventStreamClient`] drives one run at a time for a [`ServiceProfile`].
//! - [`TaskObserver`] receives messages, completion and terminal connection errors.
//! - [`Transport`] and [`TaskApi`] are the I/O seams; `task_stream_http` provides the
//!   HTTP/SSE implementation.
//! - [`decode_frame`], [`normalize_result`] and [`MessageAggregator`] are usable on
//!   their own for replaying recorded frames.
//!
//! Invariant: only the run driver opens or drops a transport connection, and at
//! most one connection is open per client.

pub mod aggregator;
pub mod client;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod message;
pub mod normalize;
pub mod observer;
pub mod profile;
pub mod reconnect;
mod run;
pub mod supervisor;
pub mod transport;

pub use aggregator::MessageAggregator;
pub use client::EventStreamClient;
pub use error::{ApiError, ClientError, DecodeError, TerminalConnectionError, TransportError};
pub use event::{
    decode_frame, AskUserContent, CompletionContent, ErrorContent, EventKind, EventPayload,
    Metadata, RawProtocolEvent, ResultContent, StreamContent, StreamState, TaskEvent,
    UserResponseContent,
};
pub use lifecycle::{SettleBarrier, SettleDelays, TaskLifecycle, TaskState};
pub use message::{Message, MessageIdAllocator};
pub use normalize::{normalize_result, NormalizedResult, ResultShape};
pub use observer::{ChannelObserver, ClientEvent, TaskObserver};
pub use profile::{EndpointPaths, ServiceProfile};
pub use reconnect::{ReconnectPolicy, MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY_MS};
pub use run::CancelSignal;
pub use supervisor::{ConnectionState, ConnectionSupervisor, SupervisorAction};
pub use transport::{FrameStream, StartRequest, StreamHandle, TaskApi, Transport};
