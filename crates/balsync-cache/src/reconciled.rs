//! The reconciled balance cache.
//!
//! Holds one [`AssetBalance`] per asset ever observed, built from a full
//! snapshot and kept current by stream updates. Updates carry the full
//! state of each asset, so applying one is an unconditional overwrite:
//! duplicates and replays re-assert a value, they never accumulate.
//!
//! The only correctness risk is a *missed* update. The owner signals a
//! possible gap with [`ReconciledCache::mark_stale`] and repairs it with a
//! fresh snapshot through [`ReconciledCache::initialize`].
//!
//! All operations take one lock for a short, bounded critical section.
//! No remote call ever happens while it is held.

use std::collections::{BTreeMap, HashSet};

use balsync_types::{
    AbsentAssetPolicy, AccountSnapshot, AccountUpdate, Asset, AssetBalance, BalsyncError, Result,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{CacheState, CacheView};

/// What [`ReconciledCache::initialize`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// First snapshot installed over an empty cache.
    Baseline { assets: usize },
    /// Snapshot installed over existing state.
    Resync {
        /// Assets replaced from the snapshot.
        replaced: usize,
        /// Cached assets the snapshot did not mention.
        absent: usize,
    },
}

struct CacheInner {
    state: CacheState,
    balances: BTreeMap<Asset, AssetBalance>,
    changed_at: BTreeMap<Asset, DateTime<Utc>>,
    sequence: u64,
    last_event_time: Option<DateTime<Utc>>,
    snapshot_as_of: Option<DateTime<Utc>>,
    applied_events: u64,
    resyncs: u64,
}

/// Snapshot-then-stream reconciled balance cache.
///
/// Share it as `Arc<ReconciledCache>`: the supervisor is the only writer,
/// every other holder reads through [`ReconciledCache::snapshot_view`].
pub struct ReconciledCache {
    inner: RwLock<CacheInner>,
    absent_assets: AbsentAssetPolicy,
}

impl ReconciledCache {
    /// Create an empty, uninitialized cache that retains absent assets on resync.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(AbsentAssetPolicy::Retain)
    }

    /// Create an empty, uninitialized cache with an explicit resync policy.
    #[must_use]
    pub fn with_policy(absent_assets: AbsentAssetPolicy) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                state: CacheState::Uninitialized,
                balances: BTreeMap::new(),
                changed_at: BTreeMap::new(),
                sequence: 0,
                last_event_time: None,
                snapshot_as_of: None,
                applied_events: 0,
                resyncs: 0,
            }),
            absent_assets,
        }
    }

    /// Install a full snapshot.
    ///
    /// From UNINITIALIZED this installs the baseline. From SYNCED or STALE
    /// it is a resync: every asset in the snapshot is replaced atomically,
    /// no pre-resync update survives for those assets, and the cache
    /// returns to SYNCED. Assets the snapshot does not mention follow the
    /// configured [`AbsentAssetPolicy`].
    ///
    /// # Errors
    /// - [`BalsyncError::InvalidSnapshot`] if the snapshot lists an asset twice.
    ///   The cache is left untouched.
    /// - [`BalsyncError::CacheClosed`] once the cache is closed.
    pub fn initialize(&self, snapshot: &AccountSnapshot) -> Result<InitOutcome> {
        snapshot.validate()?;
        let stamp = snapshot.as_of.unwrap_or_else(Utc::now);

        let mut inner = self.inner.write();
        let previous = inner.state;
        check_transition(previous, CacheState::Synced, "install snapshot")?;

        let mut absent = 0usize;
        if previous != CacheState::Uninitialized {
            let mentioned: HashSet<&str> =
                snapshot.balances.iter().map(AssetBalance::asset).collect();
            let missing: Vec<Asset> = inner
                .balances
                .keys()
                .filter(|asset| !mentioned.contains(asset.as_str()))
                .cloned()
                .collect();
            absent = missing.len();
            if self.absent_assets == AbsentAssetPolicy::Zero {
                for asset in missing {
                    inner.changed_at.insert(asset.clone(), stamp);
                    inner.balances.insert(asset.clone(), AssetBalance::zero(asset));
                }
            }
        }

        for balance in &snapshot.balances {
            inner.changed_at.insert(balance.asset().to_string(), stamp);
            inner
                .balances
                .insert(balance.asset().to_string(), balance.clone());
        }
        inner.state = CacheState::Synced;
        inner.snapshot_as_of = snapshot.as_of;
        inner.sequence += 1;

        let outcome = if previous == CacheState::Uninitialized {
            InitOutcome::Baseline {
                assets: snapshot.len(),
            }
        } else {
            inner.resyncs += 1;
            InitOutcome::Resync {
                replaced: snapshot.len(),
                absent,
            }
        };
        let sequence = inner.sequence;
        drop(inner);

        tracing::info!(
            from = %previous,
            assets = snapshot.len(),
            absent,
            sequence,
            "Snapshot installed, cache synced"
        );
        Ok(outcome)
    }

    /// Overwrite every asset carried by `update`.
    ///
    /// Valid in SYNCED and STALE. Applying the same update twice leaves the
    /// cache as the first application did. If an update lists an asset more
    /// than once, the last entry wins.
    ///
    /// Returns the number of balances written.
    ///
    /// # Errors
    /// - [`BalsyncError::InvalidCacheState`] before the first snapshot.
    /// - [`BalsyncError::CacheClosed`] once the cache is closed.
    pub fn apply(&self, update: &AccountUpdate) -> Result<usize> {
        let mut inner = self.inner.write();
        if !inner.state.accepts_updates() {
            return Err(rejected(inner.state, "apply update"));
        }

        for balance in &update.balances {
            inner
                .changed_at
                .insert(balance.asset().to_string(), update.event_time);
            inner
                .balances
                .insert(balance.asset().to_string(), balance.clone());
        }
        inner.sequence += 1;
        inner.applied_events += 1;
        inner.last_event_time = Some(
            inner
                .last_event_time
                .map_or(update.event_time, |t| t.max(update.event_time)),
        );

        tracing::debug!(
            assets = update.balances.len(),
            event_time = %update.event_time,
            sequence = inner.sequence,
            state = %inner.state,
            "Account update applied"
        );
        Ok(update.balances.len())
    }

    /// Flag a possible gap in the stream. SYNCED → STALE.
    ///
    /// Returns `true` if this call changed the state. A no-op in any
    /// other state.
    pub fn mark_stale(&self) -> bool {
        let mut inner = self.inner.write();
        if !inner.state.can_transition_to(CacheState::Stale) {
            return false;
        }
        inner.state = CacheState::Stale;
        let sequence = inner.sequence;
        drop(inner);

        tracing::warn!(sequence, "Cache marked stale pending resync");
        true
    }

    /// Close the cache. Terminal; later mutations are rejected.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        let previous = inner.state;
        if !previous.can_transition_to(CacheState::Closed) {
            return;
        }
        inner.state = CacheState::Closed;
        drop(inner);

        tracing::info!(from = %previous, "Cache closed");
    }

    /// A consistent, detached copy of the whole cache.
    #[must_use]
    pub fn snapshot_view(&self) -> CacheView {
        let inner = self.inner.read();
        CacheView {
            balances: inner.balances.clone(),
            state: inner.state,
            sequence: inner.sequence,
            last_event_time: inner.last_event_time,
            snapshot_as_of: inner.snapshot_as_of,
            changed_at: inner.changed_at.clone(),
            applied_events: inner.applied_events,
            resyncs: inner.resyncs,
        }
    }

    /// Current value for one asset.
    #[must_use]
    pub fn balance(&self, asset: &str) -> Option<AssetBalance> {
        self.inner.read().balances.get(asset).cloned()
    }

    #[must_use]
    pub fn state(&self) -> CacheState {
        self.inner.read().state
    }

    /// Whether cached balances may be used without revalidation.
    #[must_use]
    pub fn is_trusted(&self) -> bool {
        self.state().is_trusted()
    }

    /// Resync treatment of assets missing from a new snapshot.
    #[must_use]
    pub fn absent_asset_policy(&self) -> AbsentAssetPolicy {
        self.absent_assets
    }
}

impl Default for ReconciledCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The error for a mutation `state` does not allow.
fn rejected(state: CacheState, operation: &str) -> BalsyncError {
    if state == CacheState::Closed {
        return BalsyncError::CacheClosed;
    }
    BalsyncError::InvalidCacheState {
        operation: operation.into(),
        state: state.to_string(),
    }
}

fn check_transition(from: CacheState, to: CacheState, operation: &str) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(rejected(from, operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn ts(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn update(ms: i64, balances: &[AssetBalance]) -> AccountUpdate {
        AccountUpdate::new(ts(ms), balances.to_vec())
    }

    fn synced(balances: &[AssetBalance]) -> ReconciledCache {
        let cache = ReconciledCache::new();
        cache
            .initialize(&AccountSnapshot::new(balances.to_vec()))
            .unwrap();
        cache
    }

    #[test]
    fn new_cache_is_uninitialized_and_empty() {
        let cache = ReconciledCache::new();
        assert_eq!(cache.state(), CacheState::Uninitialized);
        assert!(cache.snapshot_view().is_empty());
        assert!(!cache.is_trusted());
    }

    #[test]
    fn initialize_installs_baseline() {
        let cache = ReconciledCache::new();
        let outcome = cache
            .initialize(&AccountSnapshot::new(vec![AssetBalance::of("BTC", "1", "0")]))
            .unwrap();
        assert_eq!(outcome, InitOutcome::Baseline { assets: 1 });
        assert_eq!(cache.state(), CacheState::Synced);
        assert_eq!(cache.balance("BTC").unwrap().free(), Decimal::ONE);
    }

    #[test]
    fn empty_snapshot_then_update() {
        let cache = synced(&[]);
        cache
            .apply(&update(1, &[AssetBalance::of("BTC", "1.0", "0")]))
            .unwrap();
        let view = cache.snapshot_view();
        assert_eq!(view.len(), 1);
        assert_eq!(view.get("BTC"), Some(&AssetBalance::of("BTC", "1.0", "0")));
    }

    #[test]
    fn duplicate_update_does_not_accumulate() {
        let cache = synced(&[AssetBalance::of("BTC", "1.0", "0")]);
        let half = update(5, &[AssetBalance::of("BTC", "0.5", "0")]);
        cache.apply(&half).unwrap();
        let first = cache.snapshot_view();
        cache.apply(&half).unwrap();
        let second = cache.snapshot_view();

        assert_eq!(second.get("BTC").unwrap().free(), Decimal::new(5, 1));
        assert_eq!(first.balances, second.balances);
        assert_eq!(second.applied_events, 2);
    }

    #[test]
    fn last_entry_in_one_update_wins() {
        let cache = synced(&[]);
        cache
            .apply(&update(
                1,
                &[
                    AssetBalance::of("ETH", "1", "0"),
                    AssetBalance::of("ETH", "2", "0"),
                ],
            ))
            .unwrap();
        assert_eq!(cache.balance("ETH").unwrap().free(), Decimal::new(2, 0));
    }

    #[test]
    fn apply_before_initialize_rejected() {
        let cache = ReconciledCache::new();
        let err = cache
            .apply(&update(1, &[AssetBalance::of("BTC", "1", "0")]))
            .unwrap_err();
        assert!(matches!(err, BalsyncError::InvalidCacheState { .. }));
        assert!(cache.snapshot_view().is_empty());
    }

    #[test]
    fn apply_while_stale_is_allowed_and_stays_stale() {
        let cache = synced(&[AssetBalance::of("BTC", "1", "0")]);
        assert!(cache.mark_stale());
        cache
            .apply(&update(2, &[AssetBalance::of("BTC", "3", "0")]))
            .unwrap();
        assert_eq!(cache.state(), CacheState::Stale);
        assert_eq!(cache.balance("BTC").unwrap().free(), Decimal::new(3, 0));
    }

    #[test]
    fn mark_stale_only_from_synced() {
        let cache = ReconciledCache::new();
        assert!(!cache.mark_stale());
        assert_eq!(cache.state(), CacheState::Uninitialized);

        let cache = synced(&[]);
        assert!(cache.mark_stale());
        assert!(!cache.mark_stale(), "second call is a no-op");
        assert_eq!(cache.state(), CacheState::Stale);
    }

    #[test]
    fn resync_replaces_instead_of_merging() {
        let cache = synced(&[AssetBalance::of("BTC", "1", "0")]);
        cache
            .apply(&update(1, &[AssetBalance::of("BTC", "7", "2")]))
            .unwrap();
        cache.mark_stale();

        let outcome = cache
            .initialize(&AccountSnapshot::new(vec![
                AssetBalance::of("BTC", "2", "0"),
                AssetBalance::of("ETH", "3", "0"),
            ]))
            .unwrap();

        assert_eq!(
            outcome,
            InitOutcome::Resync {
                replaced: 2,
                absent: 0
            }
        );
        let view = cache.snapshot_view();
        assert_eq!(view.state, CacheState::Synced);
        assert_eq!(view.get("BTC"), Some(&AssetBalance::of("BTC", "2", "0")));
        assert_eq!(view.get("ETH"), Some(&AssetBalance::of("ETH", "3", "0")));
        assert_eq!(view.len(), 2);
        assert_eq!(view.resyncs, 1);
    }

    #[test]
    fn resync_retains_absent_assets_by_default() {
        let cache = synced(&[AssetBalance::of("BTC", "1", "0")]);
        cache
            .apply(&update(1, &[AssetBalance::of("XRP", "10", "0")]))
            .unwrap();
        let outcome = cache
            .initialize(&AccountSnapshot::new(vec![AssetBalance::of("BTC", "2", "0")]))
            .unwrap();
        assert_eq!(
            outcome,
            InitOutcome::Resync {
                replaced: 1,
                absent: 1
            }
        );
        assert_eq!(cache.balance("XRP").unwrap().free(), Decimal::new(10, 0));
    }

    #[test]
    fn resync_zeroes_absent_assets_under_zero_policy() {
        let cache = ReconciledCache::with_policy(AbsentAssetPolicy::Zero);
        cache
            .initialize(&AccountSnapshot::new(vec![
                AssetBalance::of("BTC", "1", "0"),
                AssetBalance::of("XRP", "10", "1"),
            ]))
            .unwrap();
        cache
            .initialize(&AccountSnapshot::new(vec![AssetBalance::of("BTC", "2", "0")]))
            .unwrap();

        let xrp = cache.balance("XRP").expect("assets are zeroed, never removed");
        assert!(xrp.is_zero());
        assert_eq!(cache.snapshot_view().len(), 2);
    }

    #[test]
    fn invalid_snapshot_leaves_cache_untouched() {
        let cache = synced(&[AssetBalance::of("BTC", "1", "0")]);
        cache.mark_stale();
        let err = cache
            .initialize(&AccountSnapshot::new(vec![
                AssetBalance::of("BTC", "5", "0"),
                AssetBalance::of("BTC", "6", "0"),
            ]))
            .unwrap_err();
        assert!(matches!(err, BalsyncError::InvalidSnapshot { .. }));
        assert_eq!(cache.state(), CacheState::Stale);
        assert_eq!(cache.balance("BTC").unwrap().free(), Decimal::ONE);
    }

    #[test]
    fn closed_cache_rejects_mutation_but_stays_readable() {
        let cache = synced(&[AssetBalance::of("BTC", "1", "0")]);
        cache.close();
        cache.close();
        assert_eq!(cache.state(), CacheState::Closed);
        assert!(matches!(
            cache.apply(&update(1, &[AssetBalance::of("BTC", "2", "0")])),
            Err(BalsyncError::CacheClosed)
        ));
        assert!(matches!(
            cache.initialize(&AccountSnapshot::empty()),
            Err(BalsyncError::CacheClosed)
        ));
        assert!(!cache.mark_stale());
        assert_eq!(cache.balance("BTC").unwrap().free(), Decimal::ONE);
    }

    #[test]
    fn apply_gated_by_state_table() {
        let cache = ReconciledCache::new();
        let btc = [AssetBalance::of("BTC", "1", "0")];

        assert_eq!(
            cache.apply(&update(1, &btc)).is_ok(),
            cache.state().accepts_updates()
        );
        cache.initialize(&AccountSnapshot::new(btc.to_vec())).unwrap();
        assert!(cache.mark_stale());
        assert!(!cache.mark_stale());
        assert_eq!(
            cache.apply(&update(2, &btc)).is_ok(),
            cache.state().accepts_updates()
        );
        cache.close();
        assert_eq!(
            cache.apply(&update(3, &btc)).is_ok(),
            cache.state().accepts_updates()
        );
        assert!(!cache.state().can_transition_to(CacheState::Synced));
    }

    #[test]
    fn markers_track_sequence_and_event_time() {
        let cache = synced(&[]);
        cache
            .apply(&update(2_000, &[AssetBalance::of("BTC", "1", "0")]))
            .unwrap();
        cache
            .apply(&update(1_000, &[AssetBalance::of("ETH", "1", "0")]))
            .unwrap();
        let view = cache.snapshot_view();
        assert_eq!(view.sequence, 3);
        assert_eq!(view.applied_events, 2);
        assert_eq!(view.last_event_time, Some(ts(2_000)));
        assert_eq!(view.changed_at.get("ETH"), Some(&ts(1_000)));
    }

    #[test]
    fn snapshot_as_of_is_recorded() {
        let cache = ReconciledCache::new();
        cache
            .initialize(&AccountSnapshot::empty().with_as_of(ts(42)))
            .unwrap();
        assert_eq!(cache.snapshot_view().snapshot_as_of, Some(ts(42)));
    }

    #[test]
    fn view_is_detached_from_later_updates() {
        let cache = synced(&[AssetBalance::of("BTC", "1", "0")]);
        let before = cache.snapshot_view();
        cache
            .apply(&update(1, &[AssetBalance::of("BTC", "9", "0")]))
            .unwrap();
        assert_eq!(before.get("BTC").unwrap().free(), Decimal::ONE);
    }
}
