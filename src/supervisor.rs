//! Connection lifecycle and bounded reconnect decisions.
//!
//! The supervisor owns no I/O. The run driver reports what happened to the
//! transport and acts on the returned [`SupervisorAction`].

use std::time::Duration;

use tracing::{debug, warn};

use crate::reconnect::ReconnectPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    GaveUp,
    /// Absorbing state entered on explicit cancel or close.
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::GaveUp | Self::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    Reconnect { attempt: u32, delay: Duration },
    /// Budget spent. Returned exactly once per run.
    GiveUp { attempts: u32 },
    /// The failure arrived after close or give-up and needs no handling.
    Ignore,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionSupervisor {
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
}

impl ConnectionSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Idle,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Failed reconnect attempts since the last frame was received.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Returns false once the supervisor reached a final state.
    pub fn connecting(&mut self) -> bool {
        if self.state.is_final() {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    pub fn connected(&mut self) {
        if !self.state.is_final() {
            self.state = ConnectionState::Connected;
        }
    }

    /// A frame arrived; the failure streak is broken.
    pub fn progressed(&mut self) {
        if self.attempts > 0 && self.state == ConnectionState::Connected {
            debug!(attempts = self.attempts, "event stream recovered");
            self.attempts = 0;
        }
    }

    pub fn transport_failed(&mut self) -> SupervisorAction {
        if self.state.is_final() {
            return SupervisorAction::Ignore;
        }

        self.attempts += 1;
        if self.policy.allows(self.attempts) {
            let delay = self.policy.delay();
            warn!(
                attempt = self.attempts,
                max_attempts = self.policy.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                "event stream failed, scheduling reconnect"
            );
            self.state = ConnectionState::Reconnecting {
                attempt: self.attempts,
                delay,
            };
            SupervisorAction::Reconnect {
                attempt: self.attempts,
                delay,
            }
        } else {
            self.state = ConnectionState::GaveUp;
            SupervisorAction::GiveUp {
                attempts: self.policy.max_attempts(),
            }
        }
    }

    /// Enter `Closed` regardless of the remaining budget. Idempotent.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}
