//! Read-only, point-in-time copies of the cache.
//!
//! A [`CacheView`] is detached from the live cache: later updates never
//! change a view that has already been handed out.

use std::collections::BTreeMap;

use balsync_types::{Asset, AssetBalance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::CacheState;

/// A consistent copy of every balance plus the markers describing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheView {
    /// Balances ordered by asset symbol.
    pub balances: BTreeMap<Asset, AssetBalance>,
    /// Cache state at the moment the view was taken.
    pub state: CacheState,
    /// Local apply sequence. Increments once per applied update or snapshot.
    pub sequence: u64,
    /// Server time of the most recent applied update.
    pub last_event_time: Option<DateTime<Utc>>,
    /// Server time of the most recent installed snapshot, when reported.
    pub snapshot_as_of: Option<DateTime<Utc>>,
    /// When each asset last changed, by snapshot or update.
    pub changed_at: BTreeMap<Asset, DateTime<Utc>>,
    /// Updates applied since the cache was created.
    pub applied_events: u64,
    /// Snapshots installed over an existing baseline.
    pub resyncs: u64,
}

impl CacheView {
    /// Whether the values may be used for decisions without revalidation.
    #[must_use]
    pub fn is_trusted(&self) -> bool {
        self.state.is_trusted()
    }

    #[must_use]
    pub fn get(&self, asset: &str) -> Option<&AssetBalance> {
        self.balances.get(asset)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetBalance> {
        self.balances.values()
    }

    /// SHA-256 over the balances only.
    ///
    /// Two views with numerically equal balances produce the same digest
    /// regardless of decimal scale or markers.
    ///
    /// `SHA-256(domain_sep || count || for each asset: symbol || free || locked)`
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"balsync:view:v1:");
        hasher.update((self.balances.len() as u64).to_le_bytes());
        for balance in self.balances.values() {
            hasher.update(balance.asset().as_bytes());
            hasher.update([0u8]);
            hasher.update(balance.free().normalize().to_string().as_bytes());
            hasher.update([0u8]);
            hasher.update(balance.locked().normalize().to_string().as_bytes());
            hasher.update([0u8]);
        }
        hasher.finalize().into()
    }

    /// Hex form of [`CacheView::digest`], for logs.
    #[must_use]
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }
}
