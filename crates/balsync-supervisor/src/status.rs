//! Published supervisor status: the health query surface.

use balsync_cache::CacheState;
use balsync_types::{SessionHealth, SubscriptionId, SupervisorPhase};
use serde::Serialize;

/// Point-in-time status of a running supervisor.
///
/// Published through a `tokio::sync::watch` channel, so readers always see
/// the latest value and never block the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub phase: SupervisorPhase,
    pub health: SessionHealth,
    /// Cache state as of the last status change.
    pub cache_state: CacheState,
    /// Completed session losses since start.
    pub recoveries: u64,
    /// The live subscription, if any.
    pub subscription: Option<SubscriptionId>,
    /// Most recent failure, for operators.
    pub last_error: Option<String>,
}

impl SupervisorStatus {
    pub(crate) fn starting() -> Self {
        Self {
            phase: SupervisorPhase::Starting,
            health: SessionHealth::Resyncing,
            cache_state: CacheState::Uninitialized,
            recoveries: 0,
            subscription: None,
            last_error: None,
        }
    }

    /// Running with an active session and a trusted cache.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.phase == SupervisorPhase::Running
            && self.health == SessionHealth::Active
            && self.cache_state == CacheState::Synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_status_is_not_live() {
        let status = SupervisorStatus::starting();
        assert!(!status.is_live());
        assert_eq!(status.health, SessionHealth::Resyncing);
    }

    #[test]
    fn status_serializes_for_operators() {
        let status = SupervisorStatus::starting();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["phase"], "Starting");
        assert_eq!(json["recoveries"], 0);
    }
}
