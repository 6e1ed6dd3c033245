//! Deterministic scripted implementations of the `task_stream` I/O seams.
//!
//! This crate contains no network code and is intended for local development
//! and end-to-end client tests. Delays use tokio timers, so tests can run them
//! on a paused clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use futures_util::{stream, FutureExt, StreamExt};
use serde_json::json;
use thiserror::Error;

use task_stream::{
    ApiError, FrameStream, StartRequest, StreamHandle, TaskApi, Transport, TransportError,
};

pub mod frames;

/// One step of a scripted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Frame { delay: Duration, data: String },
    /// Fail the connection after `delay`.
    Drop { delay: Duration, reason: String },
    /// Keep the connection open without sending anything.
    Hold,
}

impl ScriptStep {
    pub fn frame(data: impl Into<String>) -> Self {
        Self::Frame {
            delay: Duration::ZERO,
            data: data.into(),
        }
    }

    pub fn frame_after(delay: Duration, data: impl Into<String>) -> Self {
        Self::Frame {
            delay,
            data: data.into(),
        }
    }

    pub fn drop_after(delay: Duration, reason: impl Into<String>) -> Self {
        Self::Drop {
            delay,
            reason: reason.into(),
        }
    }
}

/// What the transport does on one `open` call.
///
/// A connection whose steps run out ends the stream, which the client treats
/// as the remote closing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionScript {
    Refuse(String),
    Steps(Vec<ScriptStep>),
}

impl ConnectionScript {
    /// Frames sent back to back, then the connection is held open.
    pub fn frames_then_hold(frames: impl IntoIterator<Item = String>) -> Self {
        let mut steps: Vec<ScriptStep> = frames.into_iter().map(ScriptStep::frame).collect();
        steps.push(ScriptStep::Hold);
        Self::Steps(steps)
    }
}

/// Transport that replays one [`ConnectionScript`] per `open`.
#[derive(Debug)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<ConnectionScript>>,
    opens: AtomicUsize,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new(scripts: Vec<ConnectionScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            opens: AtomicUsize::new(0),
        }
    }

    /// Number of `open` calls so far, including refused ones.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn remaining_scripts(&self) -> usize {
        lock_unpoisoned(&self.scripts).len()
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, handle: &StreamHandle) -> BoxFuture<'static, Result<FrameStream, TransportError>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = lock_unpoisoned(&self.scripts).pop_front();
        let result = match script {
            None => Err(TransportError::Connect(format!(
                "no scripted connection left for {handle}"
            ))),
            Some(ConnectionScript::Refuse(reason)) => Err(TransportError::Connect(reason)),
            Some(ConnectionScript::Steps(steps)) => Ok(replay(steps)),
        };
        future::ready(result).boxed()
    }
}

fn replay(steps: Vec<ScriptStep>) -> FrameStream {
    let steps: VecDeque<ScriptStep> = steps.into();
    stream::unfold(steps, |mut steps| async move {
        match steps.pop_front()? {
            ScriptStep::Frame { delay, data } => {
                tokio::time::sleep(delay).await;
                Some((Ok(data), steps))
            }
            ScriptStep::Drop { delay, reason } => {
                tokio::time::sleep(delay).await;
                steps.clear();
                Some((Err(TransportError::Stream(reason)), steps))
            }
            ScriptStep::Hold => future::pending().await,
        }
    })
    .boxed()
}

/// Failure injected into a [`ScriptedTaskApi`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("scripted failure: {0}")]
pub struct ScriptedFailure(pub String);

/// Task API that hands out sequential handles and records every call.
#[derive(Debug, Default)]
pub struct ScriptedTaskApi {
    started: Mutex<Vec<StartRequest>>,
    responses: Mutex<Vec<(StreamHandle, String, String)>>,
    cancels: Mutex<Vec<StreamHandle>>,
    start_failure: Option<String>,
    cancel_failure: Option<String>,
}

impl ScriptedTaskApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_start(reason: impl Into<String>) -> Self {
        Self {
            start_failure: Some(reason.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_cancel_failure(mut self, reason: impl Into<String>) -> Self {
        self.cancel_failure = Some(reason.into());
        self
    }

    pub fn started(&self) -> Vec<StartRequest> {
        lock_unpoisoned(&self.started).clone()
    }

    /// `(handle, event_id, response)` per submitted answer.
    pub fn responses(&self) -> Vec<(StreamHandle, String, String)> {
        lock_unpoisoned(&self.responses).clone()
    }

    pub fn cancels(&self) -> Vec<StreamHandle> {
        lock_unpoisoned(&self.cancels).clone()
    }
}

impl TaskApi for ScriptedTaskApi {
    fn start(&self, request: StartRequest) -> BoxFuture<'static, Result<StreamHandle, ApiError>> {
        let result: Result<StreamHandle, ApiError> = match &self.start_failure {
            Some(reason) => Err(ScriptedFailure(reason.clone()).into()),
            None => {
                let mut started = lock_unpoisoned(&self.started);
                started.push(request);
                Ok(StreamHandle::new(format!("mock-run-{}", started.len())))
            }
        };
        future::ready(result).boxed()
    }

    fn respond(
        &self,
        handle: &StreamHandle,
        event_id: &str,
        response: &str,
    ) -> BoxFuture<'static, Result<(), ApiError>> {
        lock_unpoisoned(&self.responses).push((
            handle.clone(),
            event_id.to_owned(),
            response.to_owned(),
        ));
        future::ready(Ok(())).boxed()
    }

    fn cancel(&self, handle: &StreamHandle) -> BoxFuture<'static, Result<(), ApiError>> {
        lock_unpoisoned(&self.cancels).push(handle.clone());
        let result: Result<(), ApiError> = match &self.cancel_failure {
            Some(reason) => Err(ScriptedFailure(reason.clone()).into()),
            None => Ok(()),
        };
        future::ready(result).boxed()
    }
}

/// A short, realistic run: thinking, a streamed answer, stats and completion.
pub fn demo_script() -> Vec<ConnectionScript> {
    let beat = Duration::from_millis(40);
    let answer = [
        "The index ",
        "covers 42 files. ",
        "Two were updated ",
        "and one removed.",
    ];

    let mut steps = vec![
        ScriptStep::frame(frames::stream("d1", "Reading the project index", "thinking", 0)),
        ScriptStep::frame_after(beat, frames::stream("d2", "...", "complete", 1)),
        ScriptStep::frame_after(
            beat,
            frames::result(
                "d3",
                json!({"command": "/index/query", "parameters": {"query": "files"}}),
            ),
        ),
    ];
    for (index, chunk) in answer.iter().enumerate() {
        let state = if index + 1 == answer.len() {
            "complete"
        } else {
            "content"
        };
        steps.push(ScriptStep::frame_after(
            beat,
            frames::stream(&format!("d{}", index + 4), chunk, state, index as u64),
        ));
    }
    steps.push(ScriptStep::frame_after(
        beat,
        frames::result(
            "d8",
            json!({
                "model_name": "mock-model",
                "elapsed_time": 0.4,
                "first_token_time": 0.1,
                "input_tokens": 812,
                "output_tokens": 64,
                "input_cost": 0.0008,
                "output_cost": 0.0002,
                "speed": 160.0
            }),
        ),
    ));
    steps.push(ScriptStep::frame_after(beat, frames::completion("d9", "completed")));
    steps.push(ScriptStep::Hold);

    vec![ConnectionScript::Steps(steps)]
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
