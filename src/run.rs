//! Per-run driver: one tokio task owns the transport, aggregator, supervisor and
//! lifecycle of a single run and feeds the observer in arrival order.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::aggregator::MessageAggregator;
use crate::client::lock_unpoisoned;
use crate::error::{TerminalConnectionError, TransportError};
use crate::event::decode_frame;
use crate::lifecycle::{SettleBarrier, TaskLifecycle};
use crate::message::Message;
use crate::observer::TaskObserver;
use crate::supervisor::{ConnectionState, ConnectionSupervisor, SupervisorAction};
use crate::transport::{FrameStream, StreamHandle, Transport};

/// Shared cancellation flag for a run.
pub type CancelSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// State of a run shared between its driver and the client.
///
/// The lifecycle lives here so that explicit cancel and the driver's own
/// transitions go through the same state machine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct RunStatus {
    pub connection: ConnectionState,
    pub lifecycle: TaskLifecycle,
}

impl RunStatus {
    pub fn new(lifecycle: TaskLifecycle) -> Self {
        Self {
            connection: ConnectionState::Idle,
            lifecycle,
        }
    }
}

/// Serializes observer delivery against cancellation.
///
/// Once [`DeliveryGate::wait_idle`] returns after the cancel flag was set, no
/// further callback runs.
#[derive(Debug, Default)]
pub(crate) struct DeliveryGate {
    lock: Mutex<()>,
    delivering_on: Mutex<Option<ThreadId>>,
}

impl DeliveryGate {
    /// Run `deliver` unless the run is cancelled.
    pub fn deliver(&self, cancel: &CancelSignal, deliver: impl FnOnce()) -> bool {
        let _gate = lock_unpoisoned(&self.lock);
        if is_cancelled(cancel) {
            return false;
        }
        *lock_unpoisoned(&self.delivering_on) = Some(thread::current().id());
        deliver();
        *lock_unpoisoned(&self.delivering_on) = None;
        true
    }

    /// Block until an in-flight delivery finishes. Returns at once when called
    /// from inside an observer callback.
    pub fn wait_idle(&self) {
        if *lock_unpoisoned(&self.delivering_on) == Some(thread::current().id()) {
            return;
        }
        drop(lock_unpoisoned(&self.lock));
    }
}

/// The run was cancelled; unwind without emitting anything else.
#[derive(Debug)]
struct Cancelled;

enum PumpOutcome {
    Settled,
    Dropped(TransportError),
}

pub(crate) struct RunDriver {
    pub handle: StreamHandle,
    pub transport: Arc<dyn Transport>,
    pub observer: Arc<dyn TaskObserver>,
    pub aggregator: MessageAggregator,
    pub supervisor: ConnectionSupervisor,
    pub cancel: CancelSignal,
    pub status: Arc<Mutex<RunStatus>>,
    pub delivery: Arc<DeliveryGate>,
}

impl RunDriver {
    pub async fn run(mut self) {
        lock_unpoisoned(&self.status).lifecycle.begin();
        match self.drive().await {
            Ok(()) => {
                let task = lock_unpoisoned(&self.status).lifecycle.state();
                debug!(handle = %self.handle, ?task, "run finished");
            }
            Err(Cancelled) => debug!(handle = %self.handle, "run cancelled"),
        }
    }

    async fn drive(&mut self) -> Result<(), Cancelled> {
        loop {
            if !self.supervisor.connecting() {
                return Ok(());
            }
            self.sync_status();
            debug!(handle = %self.handle, attempts = self.supervisor.attempts(), "opening event stream");

            let opened = await_or_cancel(self.transport.open(&self.handle), &self.cancel).await?;
            let failure = match opened {
                Ok(frames) => {
                    self.supervisor.connected();
                    self.sync_status();
                    match self.pump(frames).await? {
                        PumpOutcome::Settled => return Ok(()),
                        PumpOutcome::Dropped(error) => error,
                    }
                }
                Err(error) => {
                    warn!(handle = %self.handle, %error, "event stream could not be opened");
                    error
                }
            };

            self.aggregator.reset();
            match self.supervisor.transport_failed() {
                SupervisorAction::Reconnect { delay, .. } => {
                    self.sync_status();
                    await_or_cancel(tokio::time::sleep(delay), &self.cancel).await?;
                }
                SupervisorAction::GiveUp { attempts } => {
                    error!(handle = %self.handle, attempts, "reconnect attempts exhausted");
                    self.update_status(|lifecycle| lifecycle.disconnect());
                    let terminal = TerminalConnectionError {
                        attempts,
                        last_error: failure,
                    };
                    return self.emit(|observer| observer.on_connection_error(terminal));
                }
                SupervisorAction::Ignore => return Ok(()),
            }
        }
    }

    async fn pump(&mut self, mut frames: FrameStream) -> Result<PumpOutcome, Cancelled> {
        let mut settle_deadline: Option<Instant> = None;

        loop {
            let next = match settle_deadline {
                Some(deadline) => {
                    let next = tokio::time::timeout_at(deadline, frames.next());
                    match await_or_cancel(next, &self.cancel).await? {
                        Ok(next) => next,
                        Err(_) => {
                            self.release_settle()?;
                            return Ok(PumpOutcome::Settled);
                        }
                    }
                }
                None => await_or_cancel(frames.next(), &self.cancel).await?,
            };

            let error = match next {
                Some(Ok(frame)) => {
                    self.supervisor.progressed();
                    if let Some(barrier) = self.handle_frame(&frame)? {
                        debug!(has_error = barrier.has_error, delay_ms = barrier.delay.as_millis() as u64, "terminal event, settling");
                        settle_deadline = Some(Instant::now() + barrier.delay);
                    }
                    continue;
                }
                Some(Err(error)) => error,
                None => TransportError::Closed,
            };

            // The run already ended; finish settling instead of reconnecting.
            if let Some(deadline) = settle_deadline {
                debug!(%error, "event stream ended while settling");
                await_or_cancel(tokio::time::sleep_until(deadline), &self.cancel).await?;
                self.release_settle()?;
                return Ok(PumpOutcome::Settled);
            }

            warn!(handle = %self.handle, %error, "event stream dropped");
            return Ok(PumpOutcome::Dropped(error));
        }
    }

    fn handle_frame(&mut self, frame: &str) -> Result<Option<SettleBarrier>, Cancelled> {
        let event = match decode_frame(frame) {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "dropping undecodable frame");
                return Ok(None);
            }
        };
        debug!(event_id = %event.event_id, kind = %event.kind(), "event received");

        let mut armed = None;
        for message in self.aggregator.apply(event) {
            if let Some(barrier) = self.observe_terminal(&message) {
                armed = Some(barrier);
            }
            self.emit(|observer| observer.on_message(message))?;
        }
        Ok(armed)
    }

    fn observe_terminal(&self, message: &Message) -> Option<SettleBarrier> {
        if !message.is_terminal() {
            return None;
        }
        lock_unpoisoned(&self.status).lifecycle.observe(message)
    }

    fn release_settle(&mut self) -> Result<(), Cancelled> {
        self.supervisor.close();
        match self.update_status(TaskLifecycle::release) {
            Some(has_error) => self.emit(|observer| observer.on_task_complete(has_error)),
            None => Ok(()),
        }
    }

    fn emit(&self, deliver: impl FnOnce(&dyn TaskObserver)) -> Result<(), Cancelled> {
        let observer = self.observer.as_ref();
        if self.delivery.deliver(&self.cancel, || deliver(observer)) {
            Ok(())
        } else {
            Err(Cancelled)
        }
    }

    fn sync_status(&self) {
        self.update_status(|_| ());
    }

    // Checked under the lock so a concurrent close is never overwritten; a
    // cancelled lifecycle already rejects every transition.
    fn update_status<T: Default>(&self, transition: impl FnOnce(&mut TaskLifecycle) -> T) -> T {
        let mut status = lock_unpoisoned(&self.status);
        if is_cancelled(&self.cancel) {
            return T::default();
        }
        status.connection = self.supervisor.state();
        transition(&mut status.lifecycle)
    }
}

fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::Acquire)
}

async fn await_or_cancel<F>(future: F, cancel: &CancelSignal) -> Result<F::Output, Cancelled>
where
    F: Future,
{
    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancel) {
            return Err(Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancel) {
                return Err(Cancelled);
            }
            return Ok(output);
        }
    }
}
