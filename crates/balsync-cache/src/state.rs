//! Lifecycle state of the reconciled cache.
//!
//! ```text
//!   ┌───────────────┐ initialize ┌────────┐ mark_stale ┌───────┐
//!   │ UNINITIALIZED ├───────────▶│ SYNCED ├───────────▶│ STALE │
//!   └───────┬───────┘            └───┬────┘◀───────────┴───┬───┘
//!           │                        │      initialize      │
//!           │         close          ▼      (resync)        │
//!           └──────────────────▶┌────────┐◀─────────────────┘
//!                               │ CLOSED │
//!                               └────────┘
//! ```
//!
//! CLOSED is terminal.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The four states of a [`crate::ReconciledCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheState {
    /// No snapshot installed yet. Reads return an empty view.
    Uninitialized,
    /// Last snapshot plus every update applied since. Trusted.
    Synced,
    /// A gap in the stream is possible. Readable, but not trusted.
    Stale,
    /// Shut down. Mutations are rejected.
    Closed,
}

impl CacheState {
    /// Can the cache move from this state to `target`?
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Uninitialized, Self::Synced | Self::Closed)
                | (Self::Synced, Self::Synced | Self::Stale | Self::Closed)
                | (Self::Stale, Self::Synced | Self::Closed)
        )
    }

    /// Whether balances may be used for decisions without revalidation.
    #[must_use]
    pub fn is_trusted(self) -> bool {
        self == Self::Synced
    }

    /// Whether stream updates may be applied in this state.
    #[must_use]
    pub fn accepts_updates(self) -> bool {
        matches!(self, Self::Synced | Self::Stale)
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "UNINITIALIZED"),
            Self::Synced => write!(f, "SYNCED"),
            Self::Stale => write!(f, "STALE"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_terminal() {
        for target in [
            CacheState::Uninitialized,
            CacheState::Synced,
            CacheState::Stale,
            CacheState::Closed,
        ] {
            assert!(!CacheState::Closed.can_transition_to(target));
        }
    }

    #[test]
    fn stale_only_reached_from_synced() {
        assert!(CacheState::Synced.can_transition_to(CacheState::Stale));
        assert!(!CacheState::Uninitialized.can_transition_to(CacheState::Stale));
        assert!(!CacheState::Stale.can_transition_to(CacheState::Stale));
    }

    #[test]
    fn resync_returns_to_synced() {
        assert!(CacheState::Stale.can_transition_to(CacheState::Synced));
        assert!(CacheState::Synced.can_transition_to(CacheState::Synced));
    }

    #[test]
    fn only_synced_is_trusted() {
        assert!(CacheState::Synced.is_trusted());
        assert!(!CacheState::Stale.is_trusted());
        assert!(!CacheState::Uninitialized.is_trusted());
        assert!(!CacheState::Closed.is_trusted());
    }

    #[test]
    fn updates_accepted_when_synced_or_stale() {
        assert!(CacheState::Synced.accepts_updates());
        assert!(CacheState::Stale.accepts_updates());
        assert!(!CacheState::Uninitialized.accepts_updates());
        assert!(!CacheState::Closed.accepts_updates());
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", CacheState::Uninitialized), "UNINITIALIZED");
        assert_eq!(format!("{}", CacheState::Stale), "STALE");
    }
}
