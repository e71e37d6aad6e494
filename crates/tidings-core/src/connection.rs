//! Connection state machine
//!
//! [`ConnectionMachine`] decides *what* the supervisor does next; it performs
//! no IO. Every input returns a list of [`Action`]s which the async driver in
//! [`crate::supervisor`] executes in order. This keeps the retry and backoff
//! contract testable without a network or a clock.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::StreamConfig;
use crate::session::Session;

/// Lifecycle of the live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "delay_ms", rename_all = "lowercase")]
pub enum ConnectionState {
    /// No usable session (or the stream is disabled)
    Idle,
    /// An open attempt is in flight
    Connecting,
    /// The transport handle is live
    Open,
    /// Waiting to retry after a failure
    #[serde(with = "duration_ms")]
    Backoff(Duration),
    /// Torn down; terminal
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Backoff(delay) => write!(f, "backoff ({}ms)", delay.as_millis()),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(delay: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(delay.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Exponential backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub floor: Duration,
    pub ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(1),
            ceiling: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self { floor, ceiling }
    }

    /// Delay after the `failures`-th consecutive failure (0-based)
    ///
    /// `min(floor * 2^failures, ceiling)`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.floor
            .checked_mul(factor)
            .unwrap_or(self.ceiling)
            .min(self.ceiling)
    }
}

impl From<&StreamConfig> for BackoffPolicy {
    fn from(config: &StreamConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_floor_ms),
            Duration::from_millis(config.backoff_ceiling_ms),
        )
    }
}

/// Identifies one open attempt
///
/// Results and events from any attempt other than the current one are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptId(pub u64);

/// Side effect requested by the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Tell the sink which session subsequent events belong to
    BindSession(Session),
    /// Start a transport open for this attempt
    Open { attempt: AttemptId, session: Session },
    /// Close the live handle and abandon any in-flight open
    Close,
    /// Arm the reconnect timer
    ScheduleReconnect(Duration),
    /// Disarm the reconnect timer
    CancelTimer,
}

/// Pure supervisor state machine
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: BackoffPolicy,
    failures: u32,
    enabled: bool,
    session: Option<Session>,
    attempt: AttemptId,
    timer_pending: bool,
}

impl ConnectionMachine {
    pub fn new(policy: BackoffPolicy, enabled: bool) -> Self {
        Self {
            state: ConnectionState::Idle,
            policy,
            failures: 0,
            enabled,
            session: None,
            attempt: AttemptId(0),
            timer_pending: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The attempt whose results are currently accepted
    pub fn current_attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn has_pending_timer(&self) -> bool {
        self.timer_pending
    }

    /// Bind the first session and connect if it is usable
    pub fn start(&mut self, session: Session) -> Vec<Action> {
        if self.state == ConnectionState::Closed {
            return Vec::new();
        }
        self.session = Some(session.clone());
        let mut actions = vec![Action::BindSession(session)];
        actions.extend(self.connect_or_idle());
        actions
    }

    /// The open for `attempt` returned a handle
    ///
    /// Returns false when the attempt is stale; the caller must then close
    /// the handle it got.
    pub fn opened(&mut self, attempt: AttemptId) -> bool {
        if attempt != self.attempt || self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Open;
        self.failures = 0;
        true
    }

    /// The open for `attempt` failed, or its handle errored or closed
    pub fn failed(&mut self, attempt: AttemptId) -> Vec<Action> {
        if attempt != self.attempt || self.timer_pending {
            return Vec::new();
        }
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            return Vec::new();
        }

        let delay = self.policy.delay_for(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.state = ConnectionState::Backoff(delay);
        self.timer_pending = true;
        vec![Action::Close, Action::ScheduleReconnect(delay)]
    }

    /// The reconnect timer elapsed
    pub fn timer_fired(&mut self) -> Vec<Action> {
        if !self.timer_pending {
            return Vec::new();
        }
        self.timer_pending = false;
        self.connect_or_idle()
    }

    /// The credential provider published a new session
    pub fn session_changed(&mut self, session: Session) -> Vec<Action> {
        if self.state == ConnectionState::Closed || self.session.as_ref() == Some(&session) {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if self.timer_pending {
            self.timer_pending = false;
            actions.push(Action::CancelTimer);
        }
        actions.push(Action::Close);
        self.failures = 0;
        // Anything still in flight belongs to the old session.
        self.attempt = AttemptId(self.attempt.0 + 1);
        self.state = ConnectionState::Idle;

        self.session = Some(session.clone());
        actions.push(Action::BindSession(session));
        actions.extend(self.connect_or_idle());
        actions
    }

    /// Final shutdown
    pub fn teardown(&mut self) -> Vec<Action> {
        if self.state == ConnectionState::Closed {
            return Vec::new();
        }
        self.state = ConnectionState::Closed;
        self.timer_pending = false;
        self.attempt = AttemptId(self.attempt.0 + 1);
        vec![Action::CancelTimer, Action::Close]
    }

    fn connect_or_idle(&mut self) -> Vec<Action> {
        match &self.session {
            Some(session) if self.enabled && session.is_active() => {
                self.attempt = AttemptId(self.attempt.0 + 1);
                self.state = ConnectionState::Connecting;
                vec![Action::Open {
                    attempt: self.attempt,
                    session: session.clone(),
                }]
            }
            _ => {
                self.state = ConnectionState::Idle;
                Vec::new()
            }
        }
    }
}
