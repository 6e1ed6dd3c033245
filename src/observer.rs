use tokio::sync::mpsc;

use crate::error::TerminalConnectionError;
use crate::message::Message;

/// Typed consumer callbacks of an [`crate::EventStreamClient`].
///
/// Callbacks run on the run's task, in emission order, and must not block.
/// No callback starts after `close` or `cancel` returned. A callback may
/// itself call `close`.
pub trait TaskObserver: Send + Sync + 'static {
    fn on_message(&self, message: Message);

    /// Fired at most once per run, after the settling delay.
    fn on_task_complete(&self, has_error: bool) {
        let _ = has_error;
    }

    /// Fired at most once per run, when the reconnect budget is spent.
    fn on_connection_error(&self, error: TerminalConnectionError) {
        let _ = error;
    }
}

/// Everything a [`ChannelObserver`] forwards.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Message(Message),
    TaskComplete { has_error: bool },
    ConnectionError(TerminalConnectionError),
}

impl ClientEvent {
    /// No further events follow for the run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TaskComplete { .. } | Self::ConnectionError(_))
    }
}

/// Observer that forwards callbacks into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ClientEvent) {
        // Receiver gone means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

impl TaskObserver for ChannelObserver {
    fn on_message(&self, message: Message) {
        self.forward(ClientEvent::Message(message));
    }

    fn on_task_complete(&self, has_error: bool) {
        self.forward(ClientEvent::TaskComplete { has_error });
    }

    fn on_connection_error(&self, error: TerminalConnectionError) {
        self.forward(ClientEvent::ConnectionError(error));
    }
}
