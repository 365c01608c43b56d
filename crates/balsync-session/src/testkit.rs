//! Scripted collaborators for tests. **Never use in production.**
//!
//! Each double replays queued results in order and falls back to a
//! benign default once its script runs out, recording every call so
//! tests can assert on what the supervisor did.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use balsync_types::{
    AccountSnapshot, BalsyncError, KeepAlive, Result, SessionGrant, SessionToken, constants,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{FrameSender, SessionKeyManager, SnapshotSource, Subscription, UpdateStream};

/// Snapshot source replaying a queue of results.
///
/// Once the queue is empty it keeps returning the fallback snapshot
/// (empty unless set).
#[derive(Default)]
pub struct ScriptedSnapshotSource {
    script: Mutex<VecDeque<Result<AccountSnapshot>>>,
    fallback: Mutex<AccountSnapshot>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedSnapshotSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, snapshot: AccountSnapshot) {
        self.script.lock().push_back(Ok(snapshot));
    }

    pub fn push_err(&self, err: BalsyncError) {
        self.script.lock().push_back(Err(err));
    }

    pub fn set_fallback(&self, snapshot: AccountSnapshot) {
        *self.fallback.lock() = snapshot;
    }

    /// Make every call sleep first, to exercise timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSnapshotSource {
    async fn fetch_snapshot(&self) -> Result<AccountSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.lock().clone()))
    }
}

/// Session key manager with scripted open and keepalive outcomes.
///
/// Unscripted opens hand out `key-1`, `key-2`, ... with a 60 minute
/// validity; unscripted keepalives succeed.
#[derive(Default)]
pub struct ScriptedSessionKeys {
    opens: Mutex<VecDeque<Result<SessionGrant>>>,
    keep_alives: Mutex<VecDeque<Result<KeepAlive>>>,
    validity: Mutex<Option<Duration>>,
    issued: AtomicUsize,
    open_calls: AtomicUsize,
    keep_alive_calls: Mutex<Vec<SessionToken>>,
    closed: Mutex<Vec<SessionToken>>,
    fail_close: Mutex<bool>,
}

impl ScriptedSessionKeys {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_open(&self, result: Result<SessionGrant>) {
        self.opens.lock().push_back(result);
    }

    pub fn push_keep_alive(&self, result: Result<KeepAlive>) {
        self.keep_alives.lock().push_back(result);
    }

    /// Validity attached to unscripted grants.
    pub fn set_validity(&self, validity: Duration) {
        *self.validity.lock() = Some(validity);
    }

    /// Make every `close_session` fail (after recording it).
    pub fn fail_close(&self, fail: bool) {
        *self.fail_close.lock() = fail;
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn keep_alive_calls(&self) -> Vec<SessionToken> {
        self.keep_alive_calls.lock().clone()
    }

    pub fn closed(&self) -> Vec<SessionToken> {
        self.closed.lock().clone()
    }
}

#[async_trait]
impl SessionKeyManager for ScriptedSessionKeys {
    async fn open_session(&self) -> Result<SessionGrant> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self.opens.lock().pop_front() {
            return result;
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let validity = self
            .validity
            .lock()
            .unwrap_or(Duration::from_millis(constants::DEFAULT_SESSION_VALIDITY_MS));
        Ok(SessionGrant::new(SessionToken::new(format!("key-{n}")), validity))
    }

    async fn keep_alive(&self, token: &SessionToken) -> Result<KeepAlive> {
        self.keep_alive_calls.lock().push(token.clone());
        self.keep_alives
            .lock()
            .pop_front()
            .unwrap_or(Ok(KeepAlive::Renewed))
    }

    async fn close_session(&self, token: &SessionToken) -> Result<()> {
        self.closed.lock().push(token.clone());
        if *self.fail_close.lock() {
            return Err(BalsyncError::transient("scripted close failure"));
        }
        Ok(())
    }
}

/// Update stream that hands the transport end of every subscription to the test.
pub struct ChannelUpdateStream {
    failures: Mutex<VecDeque<BalsyncError>>,
    subscribed: Mutex<Vec<SessionToken>>,
    buffers: Mutex<Vec<usize>>,
    senders_tx: mpsc::UnboundedSender<(SessionToken, FrameSender)>,
    senders_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(SessionToken, FrameSender)>>,
}

impl ChannelUpdateStream {
    #[must_use]
    pub fn new() -> Self {
        let (senders_tx, senders_rx) = mpsc::unbounded_channel();
        Self {
            failures: Mutex::new(VecDeque::new()),
            subscribed: Mutex::new(Vec::new()),
            buffers: Mutex::new(Vec::new()),
            senders_tx,
            senders_rx: tokio::sync::Mutex::new(senders_rx),
        }
    }

    /// Make the next `subscribe` call fail with `err`.
    pub fn push_failure(&self, err: BalsyncError) {
        self.failures.lock().push_back(err);
    }

    /// Wait for the supervisor's next subscription and take its transport end.
    pub async fn next_subscription(&self) -> Option<(SessionToken, FrameSender)> {
        self.senders_rx.lock().await.recv().await
    }

    /// Tokens used for each subscription so far.
    pub fn subscribed(&self) -> Vec<SessionToken> {
        self.subscribed.lock().clone()
    }

    /// Frame buffer requested by each subscription so far.
    pub fn buffers(&self) -> Vec<usize> {
        self.buffers.lock().clone()
    }
}

impl Default for ChannelUpdateStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpdateStream for ChannelUpdateStream {
    async fn subscribe(&self, token: &SessionToken, buffer: usize) -> Result<Subscription> {
        self.subscribed.lock().push(token.clone());
        self.buffers.lock().push(buffer);
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        let (sender, subscription) = Subscription::channel(buffer);
        // Receiver lives in self, so this only fails during drop.
        let _ = self.senders_tx.send((token.clone(), sender));
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use balsync_types::AssetBalance;

    use super::*;

    #[tokio::test]
    async fn snapshot_script_then_fallback() {
        let source = ScriptedSnapshotSource::new();
        source.push_err(BalsyncError::transient("503"));
        source.set_fallback(AccountSnapshot::new(vec![AssetBalance::of("BTC", "1", "0")]));

        assert!(source.fetch_snapshot().await.unwrap_err().is_retryable());
        assert_eq!(source.fetch_snapshot().await.unwrap().len(), 1);
        assert_eq!(source.fetch_snapshot().await.unwrap().len(), 1);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn keys_issue_sequential_tokens_and_record_calls() {
        let keys = ScriptedSessionKeys::new();
        keys.push_keep_alive(Ok(KeepAlive::NotFound));

        let first = keys.open_session().await.unwrap();
        let second = keys.open_session().await.unwrap();
        assert_eq!(first.token.expose(), "key-1");
        assert_eq!(second.token.expose(), "key-2");

        assert_eq!(keys.keep_alive(&first.token).await.unwrap(), KeepAlive::NotFound);
        assert_eq!(keys.keep_alive(&first.token).await.unwrap(), KeepAlive::Renewed);
        assert_eq!(keys.keep_alive_calls().len(), 2);

        keys.fail_close(true);
        assert!(keys.close_session(&second.token).await.is_err());
        assert_eq!(keys.closed(), vec![second.token]);
    }

    #[tokio::test]
    async fn stream_hands_out_transport_end() {
        let stream = ChannelUpdateStream::new();
        stream.push_failure(BalsyncError::transient("connect refused"));
        let token = SessionToken::new("key-1");

        assert!(stream.subscribe(&token, 8).await.is_err());
        let mut sub = stream.subscribe(&token, 8).await.unwrap();
        let (seen, tx) = stream.next_subscription().await.unwrap();
        assert_eq!(seen, token);
        assert_eq!(tx.id(), sub.id());

        tx.send("{}").await;
        assert_eq!(sub.next_frame().await.as_deref(), Some("{}"));
        assert_eq!(stream.subscribed().len(), 2);
        assert_eq!(stream.buffers(), vec![8, 8]);
    }
}
