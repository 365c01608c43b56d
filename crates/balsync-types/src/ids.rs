//! Subscription identifiers for log correlation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one stream subscription for its whole lifetime.
///
/// UUIDv7, so identifiers sort by the time the subscription was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// When the subscription was opened, read back from the UUIDv7 timestamp.
    #[must_use]
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        let (secs, nanos) = self.0.get_timestamp()?.to_unix();
        DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_sort_by_open_time() {
        let a = SubscriptionId::new();
        let b = SubscriptionId::new();
        assert_ne!(a, b);
        assert!(a.opened_at().unwrap() <= b.opened_at().unwrap());
    }

    #[test]
    fn opened_at_is_recent() {
        let opened = SubscriptionId::new().opened_at().unwrap();
        assert!((Utc::now() - opened).num_seconds().abs() < 5);
    }

    #[test]
    fn display_has_prefix() {
        assert!(format!("{}", SubscriptionId::new()).starts_with("sub:"));
    }
}
