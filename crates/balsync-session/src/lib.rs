//! # balsync-session
//!
//! Everything between the supervisor and the exchange:
//!
//! - [`SnapshotSource`], [`SessionKeyManager`], [`UpdateStream`]: the
//!   collaborator traits transport adapters implement
//! - [`Subscription`] / [`FrameSender`]: the bounded frame channel behind
//!   one stream subscription
//! - [`wire`]: JSON decoding of stream frames and REST bodies
//! - [`Backoff`]: capped exponential backoff with jitter
//!
//! With the `test-helpers` feature, [`testkit`] provides scripted
//! implementations of all three traits.

pub mod backoff;
pub mod source;
pub mod subscription;
pub mod wire;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testkit;

pub use backoff::Backoff;
pub use source::{SessionKeyManager, SnapshotSource, UpdateStream};
pub use subscription::{FrameSender, Subscription};
pub use wire::{decode_account_snapshot, decode_frame, decode_session_open};
