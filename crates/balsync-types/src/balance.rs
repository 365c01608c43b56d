//! Balance types for the reconciled account cache.
//!
//! Every asset carries a `free` balance (spendable) and a `locked`
//! balance (held by open orders). Both are fixed-precision decimals;
//! binary floating point never appears on this path.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{BalsyncError, Result, constants};

/// Type alias for asset identifiers (e.g., "BTC", "USDT", "ETH").
pub type Asset = String;

/// The full state of one asset at a point in time.
///
/// Values are immutable once constructed. A newer balance for the same
/// asset replaces the old one; nothing ever mutates an existing value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawAssetBalance")]
pub struct AssetBalance {
    asset: Asset,
    free: Decimal,
    locked: Decimal,
}

/// Unvalidated wire shape, only used as the serde entry point.
#[derive(Deserialize)]
struct RawAssetBalance {
    asset: Asset,
    free: Decimal,
    locked: Decimal,
}

impl TryFrom<RawAssetBalance> for AssetBalance {
    type Error = BalsyncError;

    fn try_from(raw: RawAssetBalance) -> Result<Self> {
        Self::new(raw.asset, raw.free, raw.locked)
    }
}

impl AssetBalance {
    /// Build a validated balance.
    ///
    /// # Errors
    /// Returns [`BalsyncError::InvalidBalance`] if the symbol is empty,
    /// either amount is negative, or either amount carries more than
    /// [`constants::BALANCE_PRECISION`] decimal places.
    pub fn new(asset: impl Into<Asset>, free: Decimal, locked: Decimal) -> Result<Self> {
        let asset = asset.into();
        if asset.trim().is_empty() {
            return Err(BalsyncError::InvalidBalance {
                asset,
                reason: "empty asset symbol".into(),
            });
        }
        for (label, amount) in [("free", free), ("locked", locked)] {
            if amount.is_sign_negative() && !amount.is_zero() {
                return Err(BalsyncError::InvalidBalance {
                    asset,
                    reason: format!("{label} amount {amount} is negative"),
                });
            }
            if amount.scale() > constants::BALANCE_PRECISION {
                return Err(BalsyncError::InvalidBalance {
                    asset,
                    reason: format!(
                        "{label} amount {amount} exceeds {} decimal places",
                        constants::BALANCE_PRECISION
                    ),
                });
            }
        }
        Ok(Self {
            asset,
            free,
            locked,
        })
    }

    /// Parse a balance from the decimal strings used on the wire.
    ///
    /// # Errors
    /// Returns [`BalsyncError::InvalidBalance`] if either string is not a
    /// decimal, plus everything [`AssetBalance::new`] rejects.
    pub fn parse(asset: impl Into<Asset>, free: &str, locked: &str) -> Result<Self> {
        let asset = asset.into();
        let free = parse_amount(&asset, "free", free)?;
        let locked = parse_amount(&asset, "locked", locked)?;
        Self::new(asset, free, locked)
    }

    /// A zero balance for `asset`. Used when an asset is zeroed rather than removed.
    #[must_use]
    pub fn zero(asset: impl Into<Asset>) -> Self {
        Self {
            asset: asset.into(),
            free: Decimal::ZERO,
            locked: Decimal::ZERO,
        }
    }

    #[must_use]
    pub fn asset(&self) -> &str {
        &self.asset
    }

    #[must_use]
    pub fn free(&self) -> Decimal {
        self.free
    }

    #[must_use]
    pub fn locked(&self) -> Decimal {
        self.locked
    }

    /// Total balance (free + locked).
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }

    /// Whether this entry has no balance at all.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.free.is_zero() && self.locked.is_zero()
    }
}

fn parse_amount(asset: &str, label: &str, raw: &str) -> Result<Decimal> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|e| BalsyncError::InvalidBalance {
            asset: asset.to_string(),
            reason: format!("{label} amount {raw:?} is not a decimal: {e}"),
        })
}

/// A full point-in-time read of every balance on the account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// One entry per asset. Asset symbols must be unique.
    pub balances: Vec<AssetBalance>,
    /// Server-side time the snapshot reflects, when the source reports one.
    pub as_of: Option<DateTime<Utc>>,
}

impl AccountSnapshot {
    #[must_use]
    pub fn new(balances: Vec<AssetBalance>) -> Self {
        Self {
            balances,
            as_of: None,
        }
    }

    /// An empty snapshot (an account holding nothing).
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    #[must_use]
    pub fn with_as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    /// Reject snapshots that cannot be a consistent full read.
    ///
    /// # Errors
    /// Returns [`BalsyncError::InvalidSnapshot`] if an asset appears twice.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.balances.len());
        for balance in &self.balances {
            if !seen.insert(balance.asset()) {
                return Err(BalsyncError::InvalidSnapshot {
                    reason: format!("asset {} appears more than once", balance.asset()),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

/// Shorthand constructors for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl AssetBalance {
    /// Build a balance from decimal literals, panicking on invalid input.
    pub fn of(asset: &str, free: &str, locked: &str) -> Self {
        Self::parse(asset, free, locked).expect("test balance must be valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_balance_is_zero() {
        let entry = AssetBalance::zero("BTC");
        assert_eq!(entry.free(), Decimal::ZERO);
        assert_eq!(entry.locked(), Decimal::ZERO);
        assert!(entry.is_zero());
    }

    #[test]
    fn total_sums_free_and_locked() {
        let entry = AssetBalance::new("USDT", Decimal::new(100, 0), Decimal::new(50, 0)).unwrap();
        assert_eq!(entry.total(), Decimal::new(150, 0));
        assert!(!entry.is_zero());
    }

    #[test]
    fn parse_keeps_exact_decimal() {
        let entry = AssetBalance::parse("ETH", "0.10000000", "0.00000001").unwrap();
        assert_eq!(entry.free(), Decimal::new(1, 1));
        assert_eq!(entry.locked(), Decimal::new(1, 8));
    }

    #[test]
    fn negative_amount_rejected() {
        let err = AssetBalance::new("BTC", Decimal::new(-1, 0), Decimal::ZERO).unwrap_err();
        assert!(matches!(err, BalsyncError::InvalidBalance { .. }));
    }

    #[test]
    fn excess_precision_rejected() {
        let err = AssetBalance::parse("BTC", "0.000000001", "0").unwrap_err();
        assert!(format!("{err}").contains("decimal places"), "Got: {err}");
    }

    #[test]
    fn empty_symbol_rejected() {
        assert!(AssetBalance::parse("  ", "1", "0").is_err());
    }

    #[test]
    fn garbage_amount_rejected() {
        let err = AssetBalance::parse("BTC", "one", "0").unwrap_err();
        assert!(matches!(err, BalsyncError::InvalidBalance { ref asset, .. } if asset == "BTC"));
    }

    #[test]
    fn deserialize_validates() {
        let ok: AssetBalance =
            serde_json::from_str(r#"{"asset":"BTC","free":"1.5","locked":"0"}"#).unwrap();
        assert_eq!(ok.free(), Decimal::new(15, 1));

        let bad = serde_json::from_str::<AssetBalance>(r#"{"asset":"BTC","free":"-1","locked":"0"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn snapshot_rejects_duplicate_assets() {
        let snap = AccountSnapshot::new(vec![
            AssetBalance::of("BTC", "1", "0"),
            AssetBalance::of("BTC", "2", "0"),
        ]);
        let err = snap.validate().unwrap_err();
        assert!(matches!(err, BalsyncError::InvalidSnapshot { .. }));
    }

    #[test]
    fn empty_snapshot_is_valid() {
        let snap = AccountSnapshot::empty();
        assert!(snap.validate().is_ok());
        assert!(snap.is_empty());
    }
}
