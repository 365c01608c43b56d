//! Remote collaborator boundaries.
//!
//! The supervisor only ever talks to the exchange through these three
//! traits. Transport adapters (HTTP client, WebSocket client) implement
//! them; tests use the scripted versions in [`crate::testkit`].
//!
//! Implementations report failures as:
//! - [`BalsyncError::Auth`] when credentials are rejected (fatal)
//! - [`BalsyncError::TransientFetch`] for anything worth retrying
//!
//! The supervisor bounds every call with its own timeout, so
//! implementations need not enforce one.
//!
//! [`BalsyncError::Auth`]: balsync_types::BalsyncError::Auth
//! [`BalsyncError::TransientFetch`]: balsync_types::BalsyncError::TransientFetch

use async_trait::async_trait;
use balsync_types::{AccountSnapshot, KeepAlive, Result, SessionGrant, SessionToken};

use crate::Subscription;

/// One-shot fetch of the full account state. No side effects, no caching.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<AccountSnapshot>;
}

/// Owner of the stream session token.
#[async_trait]
pub trait SessionKeyManager: Send + Sync {
    /// Obtain a new token and its advertised validity.
    async fn open_session(&self) -> Result<SessionGrant>;

    /// Extend the token's validity window. Idempotent.
    ///
    /// [`KeepAlive::NotFound`] means the token is gone and the session must
    /// be rebuilt; it is not an error.
    async fn keep_alive(&self, token: &SessionToken) -> Result<KeepAlive>;

    /// Invalidate the token. Best-effort: callers log and ignore failures.
    async fn close_session(&self, token: &SessionToken) -> Result<()>;
}

/// Source of account update frames keyed by a session token.
#[async_trait]
pub trait UpdateStream: Send + Sync {
    /// Open a subscription. The returned [`Subscription`] yields raw frames
    /// until the connection drops, the token is invalidated, or the caller
    /// closes it. It cannot be restarted; subscribe again instead.
    ///
    /// At most `buffer` frames wait between the transport and the consumer;
    /// past that the transport waits for the consumer.
    async fn subscribe(&self, token: &SessionToken, buffer: usize) -> Result<Subscription>;
}
