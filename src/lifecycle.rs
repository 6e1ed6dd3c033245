use std::time::Duration;

use crate::message::Message;

/// Lifecycle of one task run, as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Idle,
    Running,
    /// A terminal message was emitted; `taskComplete` is pending the settle delay.
    Completing { has_error: bool },
    Completed,
    Failed,
    Cancelled,
    /// The reconnect budget ran out before a terminal event; no `taskComplete` follows.
    Disconnected,
}

impl TaskState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Disconnected
        )
    }
}

/// Delay between emitting a terminal message and signalling `taskComplete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    pub on_error: Duration,
    pub on_completion: Duration,
}

impl SettleDelays {
    pub const fn new(on_error: Duration, on_completion: Duration) -> Self {
        Self {
            on_error,
            on_completion,
        }
    }

    /// Same delay for both outcomes.
    pub const fn uniform(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    pub fn delay_for(&self, has_error: bool) -> Duration {
        if has_error {
            self.on_error
        } else {
            self.on_completion
        }
    }
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self::new(Duration::from_millis(300), Duration::from_millis(1000))
    }
}

/// Flush-then-signal barrier armed by the first terminal message of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleBarrier {
    pub has_error: bool,
    pub delay: Duration,
}

/// Exactly-once `taskComplete` bookkeeping for a single run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskLifecycle {
    settle: SettleDelays,
    state: TaskState,
}

impl TaskLifecycle {
    pub fn new(settle: SettleDelays) -> Self {
        Self {
            settle,
            state: TaskState::Idle,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn begin(&mut self) {
        if self.state == TaskState::Idle {
            self.state = TaskState::Running;
        }
    }

    /// Arm the settle barrier if `message` is the run's first terminal message.
    ///
    /// Later terminal messages, and any message after cancellation, return `None`.
    pub fn observe(&mut self, message: &Message) -> Option<SettleBarrier> {
        if !message.is_terminal() || self.state != TaskState::Running {
            return None;
        }
        let has_error = message.kind == crate::event::EventKind::Error;
        self.state = TaskState::Completing { has_error };
        Some(SettleBarrier {
            has_error,
            delay: self.settle.delay_for(has_error),
        })
    }

    /// Resolve a pending barrier. Returns the `has_error` flag to signal, once.
    pub fn release(&mut self) -> Option<bool> {
        let TaskState::Completing { has_error } = self.state else {
            return None;
        };
        self.state = if has_error {
            TaskState::Failed
        } else {
            TaskState::Completed
        };
        Some(has_error)
    }

    /// Explicit cancel. Suppresses a pending `taskComplete`.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = TaskState::Cancelled;
        }
    }

    /// The connection was given up on while the run was still open.
    pub fn disconnect(&mut self) {
        if !self.state.is_terminal() {
            self.state = TaskState::Disconnected;
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn message(kind: EventKind) -> Message {
        Message::new("id", kind, "text", "e")
    }

    #[test]
    fn first_terminal_message_arms_barrier_with_outcome_delay() {
        let mut lifecycle = TaskLifecycle::new(SettleDelays::default());
        lifecycle.begin();

        assert_eq!(lifecycle.observe(&message(EventKind::Stream)), None);
        let barrier = lifecycle.observe(&message(EventKind::Error));

        assert_eq!(
            barrier,
            Some(SettleBarrier {
                has_error: true,
                delay: Duration::from_millis(300),
            })
        );
        assert_eq!(lifecycle.state(), TaskState::Completing { has_error: true });
    }

    #[test]
    fn later_terminal_messages_are_ignored() {
        let mut lifecycle = TaskLifecycle::new(SettleDelays::default());
        lifecycle.begin();

        assert!(lifecycle.observe(&message(EventKind::Completion)).is_some());
        assert!(lifecycle.observe(&message(EventKind::Error)).is_none());
        assert_eq!(lifecycle.release(), Some(false));
        assert_eq!(lifecycle.release(), None);
        assert!(lifecycle.observe(&message(EventKind::Completion)).is_none());
        assert_eq!(lifecycle.state(), TaskState::Completed);
    }

    #[test]
    fn cancel_while_completing_suppresses_signal() {
        let mut lifecycle = TaskLifecycle::new(SettleDelays::uniform(Duration::from_millis(5)));
        lifecycle.begin();
        lifecycle.observe(&message(EventKind::Completion));

        lifecycle.cancel();

        assert_eq!(lifecycle.release(), None);
        assert_eq!(lifecycle.state(), TaskState::Cancelled);
    }

    #[test]
    fn cancel_after_completion_keeps_outcome() {
        let mut lifecycle = TaskLifecycle::new(SettleDelays::default());
        lifecycle.begin();
        lifecycle.observe(&message(EventKind::Error));
        lifecycle.release();

        lifecycle.cancel();

        assert_eq!(lifecycle.state(), TaskState::Failed);
    }

    #[test]
    fn disconnect_ends_an_open_run_without_signal() {
        let mut lifecycle = TaskLifecycle::new(SettleDelays::default());
        lifecycle.begin();

        lifecycle.disconnect();

        assert_eq!(lifecycle.state(), TaskState::Disconnected);
        assert!(lifecycle.is_terminated());
        assert!(lifecycle.observe(&message(EventKind::Completion)).is_none());
        assert_eq!(lifecycle.release(), None);

        lifecycle.cancel();
        assert_eq!(lifecycle.state(), TaskState::Disconnected);
    }
}
