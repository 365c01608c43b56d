//! Session types: the stream token, its grant, and supervisor health.
//!
//! The supervisor cycles through:
//! **STARTING → RUNNING → RECOVERING → RUNNING → ... → STOPPED**
//!
//! `SessionHealth` is the finer-grained view of the same lifecycle that
//! downstream consumers poll to decide whether cached balances are usable.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque credential authorizing one stream subscription.
///
/// `Debug` and `Display` show only a short prefix so tokens never land in
/// logs in full.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(String);

impl SessionToken {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The full token value, for building the subscription request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First few characters of the token, for log correlation.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.chars().take(6).collect()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({}…)", self.short())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}…", self.short())
    }
}

/// A freshly opened session: the token plus its advertised validity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub token: SessionToken,
    /// How long the server keeps the token alive without a keepalive.
    pub validity: Duration,
    /// When the grant was received locally.
    pub issued_at: DateTime<Utc>,
}

impl SessionGrant {
    #[must_use]
    pub fn new(token: SessionToken, validity: Duration) -> Self {
        Self {
            token,
            validity,
            issued_at: Utc::now(),
        }
    }

    /// Keepalive period: half the advertised validity, capped by `configured`.
    #[must_use]
    pub fn keepalive_period(&self, configured: Duration) -> Duration {
        (self.validity / 2).min(configured).max(Duration::from_millis(1))
    }
}

/// Outcome of a keepalive call that reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeepAlive {
    /// The session's validity window was extended.
    Renewed,
    /// The session already expired or was invalidated remotely.
    NotFound,
}

/// Health of the stream session as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionHealth {
    /// Session open, stream subscribed, cache trusted.
    Active,
    /// Keepalives are failing; the session may lapse soon.
    Expiring,
    /// Session or stream lost; cache marked stale.
    Disconnected,
    /// Re-opening the session and re-snapshotting.
    Resyncing,
}

impl fmt::Display for SessionHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Expiring => write!(f, "EXPIRING"),
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Resyncing => write!(f, "RESYNCING"),
        }
    }
}

/// Lifecycle phase of the session supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupervisorPhase {
    /// Initial snapshot, session and subscription in progress.
    Starting,
    /// Consuming the stream.
    Running,
    /// Rebuilding session, snapshot and subscription after a loss.
    Recovering,
    /// Shut down, either on request or after a fatal error.
    Stopped,
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "STARTING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Recovering => write!(f, "RECOVERING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl SupervisorPhase {
    /// Can the supervisor move from this phase to `target`?
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Starting, Self::Running | Self::Stopped)
                | (Self::Running, Self::Recovering | Self::Stopped)
                | (Self::Recovering, Self::Running | Self::Stopped)
        )
    }
}
