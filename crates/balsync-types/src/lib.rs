//! # balsync-types
//!
//! Shared types, errors, and configuration for **BalSync**, the reconciled
//! account balance cache.
//!
//! This crate is the leaf dependency of the workspace. Every other crate
//! depends on it. It defines:
//!
//! - **Balance model**: [`AssetBalance`], [`AccountSnapshot`], [`Asset`]
//! - **Event model**: [`UpdateEvent`], [`AccountUpdate`]
//! - **Session model**: [`SessionToken`], [`SessionGrant`], [`KeepAlive`], [`SessionHealth`], [`SupervisorPhase`]
//! - **Identifiers**: [`SubscriptionId`]
//! - **Configuration**: [`SupervisorConfig`], [`BackoffConfig`], [`TimeoutConfig`], [`AbsentAssetPolicy`]
//! - **Errors**: [`BalsyncError`] with `BS_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod balance;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod ids;
pub mod session;

// Re-export all primary types at crate root for ergonomic imports:
//   use balsync_types::{AssetBalance, UpdateEvent, SessionToken, ...};

pub use balance::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use ids::*;
pub use session::*;

// Constants are accessed via `balsync_types::constants::FOO`
// (not re-exported to avoid name collisions).
