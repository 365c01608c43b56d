//! The session supervisor: the only writer of the reconciled cache.
//!
//! ```text
//!  STARTING ──▶ RUNNING ──▶ RECOVERING ──▶ RUNNING ──▶ ... ──▶ STOPPED
//!     │            │  stream closed /           │
//!     │            │  keepalive NotFound        │
//!     └────────────┴────────────────────────────┴──── shutdown / AuthError
//! ```
//!
//! Start: snapshot, open session, subscribe, initialize, keepalive.
//! Recovery: mark stale, new session, new snapshot, new subscription,
//! resync. Every step is bounded by a timeout and retried with
//! capped exponential backoff until it succeeds or fails with an
//! authentication error.
//!
//! Two tasks run per session: the consumer (this module) and the
//! keepalive timer ([`crate::keepalive`]). Only the consumer mutates the
//! cache or the published status.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use balsync_cache::{CacheView, InitOutcome, ReconciledCache};
use balsync_session::{
    Backoff, SessionKeyManager, SnapshotSource, Subscription, UpdateStream, decode_frame,
};
use balsync_types::{
    AccountSnapshot, BalsyncError, Result, SessionGrant, SessionHealth, SessionToken,
    SupervisorConfig, SupervisorPhase, UpdateEvent, constants,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::SupervisorStatus;
use crate::keepalive::{KeepaliveParams, KeepaliveSignal, run_keepalive};

/// Builder-style owner of the collaborators, consumed by [`SessionSupervisor::spawn`].
pub struct SessionSupervisor {
    cache: Arc<ReconciledCache>,
    snapshots: Arc<dyn SnapshotSource>,
    keys: Arc<dyn SessionKeyManager>,
    stream: Arc<dyn UpdateStream>,
    config: SupervisorConfig,
}

impl SessionSupervisor {
    /// Validate `config` and create the cache the supervisor will own.
    ///
    /// # Errors
    /// [`BalsyncError::Configuration`] if `config` is inconsistent.
    pub fn new(
        snapshots: Arc<dyn SnapshotSource>,
        keys: Arc<dyn SessionKeyManager>,
        stream: Arc<dyn UpdateStream>,
        config: SupervisorConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cache: Arc::new(ReconciledCache::with_policy(config.absent_assets)),
            snapshots,
            keys,
            stream,
            config,
        })
    }

    /// Read access to the cache, usable before and after [`Self::spawn`].
    #[must_use]
    pub fn cache(&self) -> Arc<ReconciledCache> {
        Arc::clone(&self.cache)
    }

    /// Start the supervisor on the current tokio runtime.
    #[must_use]
    pub fn spawn(self) -> SupervisorHandle {
        let (status_tx, status_rx) = watch::channel(SupervisorStatus::starting());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cache = Arc::clone(&self.cache);

        let driver = Driver {
            backoff: Backoff::new(self.config.backoff.clone()),
            cache: self.cache,
            snapshots: self.snapshots,
            keys: self.keys,
            stream: self.stream,
            config: self.config,
            status: status_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(driver.run());

        SupervisorHandle {
            cache,
            status: status_rx,
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Control and query surface of a running supervisor.
///
/// Dropping the handle stops the supervisor as if [`Self::shutdown`] had
/// been called, without waiting for it.
pub struct SupervisorHandle {
    cache: Arc<ReconciledCache>,
    status: watch::Receiver<SupervisorStatus>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl SupervisorHandle {
    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn health(&self) -> SessionHealth {
        self.status.borrow().health
    }

    #[must_use]
    pub fn phase(&self) -> SupervisorPhase {
        self.status.borrow().phase
    }

    /// A receiver that wakes on every status change.
    #[must_use]
    pub fn subscribe_health(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ReconciledCache> {
        &self.cache
    }

    /// Shorthand for `cache().snapshot_view()`.
    #[must_use]
    pub fn view(&self) -> CacheView {
        self.cache.snapshot_view()
    }

    /// Whether the supervisor task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the supervisor and wait for it: subscription closed, session
    /// closed best-effort, cache closed.
    ///
    /// # Errors
    /// The fatal error that stopped the supervisor, if it had already
    /// stopped on its own.
    pub async fn shutdown(self) -> Result<()> {
        // Fails only if the task already exited.
        let _ = self.shutdown.send(true);
        self.wait().await
    }

    /// Wait until the supervisor stops on its own.
    ///
    /// # Errors
    /// The fatal error that stopped it, or [`BalsyncError::Internal`] if
    /// the task panicked.
    pub async fn wait(self) -> Result<()> {
        let Self { task, shutdown, .. } = self;
        let result = task
            .await
            .map_err(|e| BalsyncError::Internal(format!("supervisor task failed: {e}")))?;
        drop(shutdown);
        result
    }
}

/// A subscribed, kept-alive session.
struct ActiveSession {
    grant: SessionGrant,
    subscription: Subscription,
    signals: mpsc::Receiver<KeepaliveSignal>,
    keepalive: JoinHandle<()>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

/// Why a session stopped being consumed.
enum SessionEnd {
    Shutdown,
    Lost(String),
    Fatal(BalsyncError),
}

/// What one frame did.
enum FrameOutcome {
    Continue,
    Expired,
}

struct Driver {
    cache: Arc<ReconciledCache>,
    snapshots: Arc<dyn SnapshotSource>,
    keys: Arc<dyn SessionKeyManager>,
    stream: Arc<dyn UpdateStream>,
    config: SupervisorConfig,
    backoff: Backoff,
    status: watch::Sender<SupervisorStatus>,
    shutdown: watch::Receiver<bool>,
}

/// Resolves once shutdown is requested or the handle is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Bound `call` by `limit`, turning expiry into a transient [`BalsyncError::Timeout`].
async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BalsyncError::Timeout {
            operation: operation.into(),
            after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

impl Driver {
    async fn run(mut self) -> Result<()> {
        tracing::info!(
            engine = constants::ENGINE_NAME,
            version = constants::VERSION,
            "Supervisor starting"
        );

        let result = self.supervise().await;

        if let Err(e) = &result {
            tracing::error!(error = %e, "Supervisor stopped on fatal error");
        }
        self.cache.close();
        self.publish(|s| {
            s.phase = SupervisorPhase::Stopped;
            s.health = SessionHealth::Disconnected;
            s.subscription = None;
            if let Err(e) = &result {
                s.last_error = Some(e.to_string());
            }
        });
        tracing::info!("Supervisor stopped");
        result
    }

    async fn supervise(&mut self) -> Result<()> {
        let mut recovering = false;
        loop {
            let Some(mut session) = self.establish(recovering).await? else {
                return Ok(());
            };

            self.backoff.reset();
            let subscription = session.subscription.id();
            self.set_phase(SupervisorPhase::Running);
            self.publish(|s| {
                s.health = SessionHealth::Active;
                s.subscription = Some(subscription);
            });
            tracing::info!(
                subscription = %subscription,
                opened_at = ?subscription.opened_at(),
                token = %session.grant.token,
                "Stream subscribed, supervisor running"
            );

            let end = self.consume(&mut session).await;
            self.teardown(session).await;

            match end {
                SessionEnd::Shutdown => return Ok(()),
                SessionEnd::Fatal(e) => return Err(e),
                SessionEnd::Lost(reason) => {
                    recovering = true;
                    self.publish(|s| s.health = SessionHealth::Resyncing);
                    tracing::info!(reason = %reason, "Re-establishing session");
                }
            }
        }
    }

    /// Build a session, retrying until it succeeds, fails fatally, or
    /// shutdown is requested (`Ok(None)`).
    async fn establish(&mut self, recovering: bool) -> Result<Option<ActiveSession>> {
        let mut shutdown = self.shutdown.clone();
        loop {
            match self.try_establish(recovering).await {
                Ok(Some(session)) => return Ok(Some(session)),
                Ok(None) => return Ok(None),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    let attempt = self.backoff.attempt();
                    if attempt == 1 || attempt % constants::RETRY_LOG_EVERY == 0 {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "Session setup failed, retrying"
                        );
                    } else {
                        tracing::debug!(
                            attempt,
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "Session setup failed, retrying"
                        );
                    }
                    self.publish(|s| s.last_error = Some(e.to_string()));

                    tokio::select! {
                        biased;
                        () = stop_requested(&mut shutdown) => return Ok(None),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One setup attempt. Any session opened by a failed or interrupted
    /// attempt is closed before returning.
    async fn try_establish(&self, recovering: bool) -> Result<Option<ActiveSession>> {
        let mut opened: Option<SessionToken> = None;
        let result = self.establish_steps(recovering, &mut opened).await;
        if !matches!(result, Ok(Some(_))) {
            if let Some(token) = opened {
                self.close_session(&token).await;
            }
        }
        result
    }

    async fn establish_steps(
        &self,
        recovering: bool,
        opened: &mut Option<SessionToken>,
    ) -> Result<Option<ActiveSession>> {
        let timeouts = &self.config.timeouts;

        // Fetched early on start, after the session on recovery. Installed
        // only once the new subscription exists, so the cache is never
        // SYNCED without a stream behind it.
        let mut snapshot = None;
        if !recovering {
            let Some(fetched) = self.fetch_snapshot().await? else {
                return Ok(None);
            };
            snapshot = Some(fetched);
        }

        let Some(grant) = self
            .interruptible(bounded(
                "open session",
                timeouts.session,
                self.keys.open_session(),
            ))
            .await?
        else {
            return Ok(None);
        };
        *opened = Some(grant.token.clone());
        tracing::info!(
            token = %grant.token,
            validity_s = grant.validity.as_secs(),
            "Session opened"
        );

        let snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => {
                let Some(fetched) = self.fetch_snapshot().await? else {
                    return Ok(None);
                };
                fetched
            }
        };

        let Some(subscription) = self
            .interruptible(bounded(
                "subscribe",
                timeouts.subscribe,
                self.stream.subscribe(&grant.token, self.config.event_buffer),
            ))
            .await?
        else {
            return Ok(None);
        };

        self.install_snapshot(&snapshot)?;

        let period = grant.keepalive_period(self.config.keepalive_interval);
        let (signal_tx, signals) = mpsc::channel(8);
        let keepalive = tokio::spawn(run_keepalive(
            Arc::clone(&self.keys),
            KeepaliveParams {
                token: grant.token.clone(),
                period,
                call_timeout: timeouts.session,
                max_failures: self.config.max_keepalive_failures,
            },
            signal_tx,
        ));

        Ok(Some(ActiveSession {
            grant,
            subscription,
            signals,
            keepalive,
        }))
    }

    /// Fetch a snapshot. `Ok(None)` if shutdown interrupted the fetch.
    async fn fetch_snapshot(&self) -> Result<Option<AccountSnapshot>> {
        self.interruptible(bounded(
            "fetch snapshot",
            self.config.timeouts.snapshot,
            self.snapshots.fetch_snapshot(),
        ))
        .await
    }

    fn install_snapshot(&self, snapshot: &AccountSnapshot) -> Result<()> {
        match self.cache.initialize(snapshot)? {
            InitOutcome::Baseline { assets } => {
                tracing::info!(assets, "Baseline snapshot installed");
            }
            InitOutcome::Resync { replaced, absent } => {
                tracing::info!(replaced, absent, "Resync snapshot installed");
            }
        }
        self.publish(|_| {});
        Ok(())
    }

    /// Run `call` unless shutdown is requested first. `Ok(None)` means shutdown.
    async fn interruptible<T>(&self, call: impl Future<Output = Result<T>>) -> Result<Option<T>> {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            () = stop_requested(&mut shutdown) => Ok(None),
            result = call => result.map(Some),
        }
    }

    async fn consume(&self, session: &mut ActiveSession) -> SessionEnd {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                () = stop_requested(&mut shutdown) => return SessionEnd::Shutdown,
                signal = session.signals.recv() => match signal {
                    Some(KeepaliveSignal::Renewed) => {
                        if self.status.borrow().health == SessionHealth::Expiring {
                            self.publish(|s| s.health = SessionHealth::Active);
                        }
                    }
                    Some(KeepaliveSignal::Degraded { failures }) => {
                        self.publish(|s| {
                            s.health = SessionHealth::Expiring;
                            s.last_error = Some(format!("{failures} keepalive failure(s)"));
                        });
                    }
                    Some(KeepaliveSignal::Lost { reason }) => {
                        return self.session_lost(reason);
                    }
                    Some(KeepaliveSignal::Fatal(e)) => return SessionEnd::Fatal(e),
                    None => return self.session_lost("keepalive task ended".into()),
                },
                frame = session.subscription.next_frame() => match frame {
                    Some(frame) => {
                        if let FrameOutcome::Expired = self.handle_frame(&frame) {
                            return self.session_lost("server reported session expired".into());
                        }
                    }
                    None => return self.session_lost("stream closed".into()),
                },
            }
        }
    }

    fn handle_frame(&self, frame: &str) -> FrameOutcome {
        let event = match decode_frame(frame) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                return FrameOutcome::Continue;
            }
        };

        match event {
            UpdateEvent::AccountUpdate(update) => {
                if let Err(e) = self.cache.apply(&update) {
                    tracing::warn!(error = %e, "Account update not applied");
                }
                FrameOutcome::Continue
            }
            UpdateEvent::SessionExpired { .. } => FrameOutcome::Expired,
            UpdateEvent::Other { event_type, .. } => {
                tracing::trace!(event_type = %event_type, "Ignoring non-balance event");
                FrameOutcome::Continue
            }
        }
    }

    /// Mark the cache stale and enter recovery.
    fn session_lost(&self, reason: String) -> SessionEnd {
        self.cache.mark_stale();
        tracing::warn!(reason = %reason, "Session lost, cache marked stale");
        self.set_phase(SupervisorPhase::Recovering);
        self.publish(|s| {
            s.health = SessionHealth::Disconnected;
            s.subscription = None;
            s.recoveries += 1;
            s.last_error = Some(reason.clone());
        });
        SessionEnd::Lost(reason)
    }

    /// Close subscription, stop keepalive, close session best-effort.
    async fn teardown(&self, mut session: ActiveSession) {
        session.subscription.close();
        session.keepalive.abort();
        self.close_session(&session.grant.token).await;
    }

    async fn close_session(&self, token: &SessionToken) {
        match bounded(
            "close session",
            self.config.timeouts.session,
            self.keys.close_session(token),
        )
        .await
        {
            Ok(()) => tracing::debug!(token = %token, "Session closed"),
            Err(e) => tracing::warn!(token = %token, error = %e, "Session close failed, ignoring"),
        }
    }

    fn set_phase(&self, target: SupervisorPhase) {
        let current = self.status.borrow().phase;
        if current == target {
            return;
        }
        if !current.can_transition_to(target) {
            tracing::warn!(from = %current, to = %target, "Unexpected supervisor phase change");
        }
        self.publish(|s| s.phase = target);
        tracing::info!(from = %current, to = %target, "Supervisor phase changed");
    }

    /// Apply `change` to the status and refresh the cache state in it.
    fn publish(&self, change: impl FnOnce(&mut SupervisorStatus)) {
        let cache_state = self.cache.state();
        self.status.send_modify(|status| {
            change(status);
            status.cache_state = cache_state;
        });
    }
}
