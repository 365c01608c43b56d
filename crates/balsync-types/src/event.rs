//! Update events delivered by the account stream.
//!
//! Only [`UpdateEvent::AccountUpdate`] changes the cache. Its balances use
//! full-replace semantics per asset: an update for an asset supersedes the
//! prior value, it is never added to it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AssetBalance;

/// A decoded message from the update stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateEvent {
    /// New full state for one or more assets.
    AccountUpdate(AccountUpdate),
    /// The server reports that the session token behind this stream expired.
    SessionExpired { event_time: DateTime<Utc> },
    /// Any other event type on the stream (order updates, deltas, ...).
    Other {
        event_type: String,
        event_time: Option<DateTime<Utc>>,
    },
}

impl UpdateEvent {
    /// Server time attached to the event, if any.
    #[must_use]
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::AccountUpdate(update) => Some(update.event_time),
            Self::SessionExpired { event_time } => Some(*event_time),
            Self::Other { event_time, .. } => *event_time,
        }
    }

    /// Returns true if this event ends the session behind the stream.
    #[must_use]
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::SessionExpired { .. })
    }
}

impl fmt::Display for UpdateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccountUpdate(u) => {
                write!(f, "AccountUpdate({} assets @ {})", u.balances.len(), u.event_time)
            }
            Self::SessionExpired { event_time } => write!(f, "SessionExpired({event_time})"),
            Self::Other { event_type, .. } => write!(f, "Other({event_type})"),
        }
    }
}

/// New full state for the listed assets, as of `event_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    /// Server timestamp of the event. Kept for observability, not ordering.
    pub event_time: DateTime<Utc>,
    /// Server time of the last account change, when the stream reports it.
    pub last_update_time: Option<DateTime<Utc>>,
    /// New full state per asset.
    pub balances: Vec<AssetBalance>,
}

impl AccountUpdate {
    #[must_use]
    pub fn new(event_time: DateTime<Utc>, balances: Vec<AssetBalance>) -> Self {
        Self {
            event_time,
            last_update_time: None,
            balances,
        }
    }
}
