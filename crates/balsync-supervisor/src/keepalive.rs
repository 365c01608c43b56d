//! Periodic session keepalive.
//!
//! Runs as its own task next to the consumer. It never touches the cache;
//! it only reports to the consumer, which owns every reaction.

use std::sync::Arc;
use std::time::Duration;

use balsync_session::SessionKeyManager;
use balsync_types::{BalsyncError, KeepAlive, SessionToken};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

/// What the keepalive task tells the consumer.
#[derive(Debug)]
pub(crate) enum KeepaliveSignal {
    /// Validity extended. Clears an earlier `Degraded`.
    Renewed,
    /// A keepalive failed transiently; the session may lapse.
    Degraded { failures: u32 },
    /// The session is gone. The task has exited.
    Lost { reason: String },
    /// Credentials rejected. The task has exited.
    Fatal(BalsyncError),
}

pub(crate) struct KeepaliveParams {
    pub token: SessionToken,
    pub period: Duration,
    pub call_timeout: Duration,
    pub max_failures: u32,
}

/// Renew `token` every `period` until the session is lost or the task is aborted.
///
/// The first renewal happens one full period after start.
pub(crate) async fn run_keepalive(
    keys: Arc<dyn SessionKeyManager>,
    params: KeepaliveParams,
    signals: mpsc::Sender<KeepaliveSignal>,
) {
    let KeepaliveParams {
        token,
        period,
        call_timeout,
        max_failures,
    } = params;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = 0u32;

    tracing::debug!(token = %token, period_ms = period.as_millis(), "Keepalive started");

    loop {
        ticker.tick().await;

        let outcome = match tokio::time::timeout(call_timeout, keys.keep_alive(&token)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BalsyncError::Timeout {
                operation: "keepalive".into(),
                after_ms: u64::try_from(call_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        let signal = match outcome {
            Ok(KeepAlive::Renewed) => {
                failures = 0;
                tracing::debug!(token = %token, "Session renewed");
                KeepaliveSignal::Renewed
            }
            Ok(KeepAlive::NotFound) => {
                tracing::warn!(token = %token, "Keepalive reports session not found");
                KeepaliveSignal::Lost {
                    reason: "keepalive: session not found".into(),
                }
            }
            Err(e) if e.is_fatal() => KeepaliveSignal::Fatal(e),
            Err(e) if e.is_session_lost() => {
                tracing::warn!(token = %token, error = %e, "Keepalive reports session lost");
                KeepaliveSignal::Lost {
                    reason: format!("keepalive: {e}"),
                }
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    token = %token,
                    failures,
                    max_failures,
                    error = %e,
                    "Keepalive failed"
                );
                if failures >= max_failures {
                    KeepaliveSignal::Lost {
                        reason: format!("keepalive failed {failures} times in a row: {e}"),
                    }
                } else {
                    KeepaliveSignal::Degraded { failures }
                }
            }
        };

        let terminal = matches!(
            signal,
            KeepaliveSignal::Lost { .. } | KeepaliveSignal::Fatal(_)
        );
        if signals.send(signal).await.is_err() || terminal {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use balsync_session::testkit::ScriptedSessionKeys;

    use super::*;

    fn params(max_failures: u32) -> KeepaliveParams {
        KeepaliveParams {
            token: SessionToken::new("key-1"),
            period: Duration::from_secs(60),
            call_timeout: Duration::from_secs(5),
            max_failures,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn renews_each_period_then_reports_not_found() {
        let keys = Arc::new(ScriptedSessionKeys::new());
        keys.push_keep_alive(Ok(KeepAlive::Renewed));
        keys.push_keep_alive(Ok(KeepAlive::NotFound));
        let (tx, mut rx) = mpsc::channel(8);

        let started = Instant::now();
        let task = tokio::spawn(run_keepalive(keys.clone(), params(3), tx));

        assert!(matches!(rx.recv().await, Some(KeepaliveSignal::Renewed)));
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(matches!(rx.recv().await, Some(KeepaliveSignal::Lost { .. })));
        assert!(started.elapsed() >= Duration::from_secs(120));

        task.await.unwrap();
        assert!(rx.recv().await.is_none());
        assert_eq!(keys.keep_alive_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_escalate_after_limit() {
        let keys = Arc::new(ScriptedSessionKeys::new());
        keys.push_keep_alive(Err(BalsyncError::transient("503")));
        keys.push_keep_alive(Ok(KeepAlive::Renewed));
        keys.push_keep_alive(Err(BalsyncError::transient("503")));
        keys.push_keep_alive(Err(BalsyncError::transient("503")));
        let (tx, mut rx) = mpsc::channel(8);

        tokio::spawn(run_keepalive(keys, params(2), tx));

        assert!(matches!(
            rx.recv().await,
            Some(KeepaliveSignal::Degraded { failures: 1 })
        ));
        assert!(matches!(rx.recv().await, Some(KeepaliveSignal::Renewed)));
        assert!(matches!(
            rx.recv().await,
            Some(KeepaliveSignal::Degraded { failures: 1 })
        ));
        assert!(matches!(rx.recv().await, Some(KeepaliveSignal::Lost { .. })));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_session_error_is_loss_not_degradation() {
        let keys = Arc::new(ScriptedSessionKeys::new());
        keys.push_keep_alive(Err(BalsyncError::SessionLost {
            reason: "unknown listen key".into(),
        }));
        let (tx, mut rx) = mpsc::channel(8);

        tokio::spawn(run_keepalive(keys.clone(), params(3), tx));

        match rx.recv().await {
            Some(KeepaliveSignal::Lost { reason }) => assert!(reason.contains("unknown listen key")),
            other => panic!("expected loss, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());
        assert_eq!(keys.keep_alive_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_is_fatal() {
        let keys = Arc::new(ScriptedSessionKeys::new());
        keys.push_keep_alive(Err(BalsyncError::auth("key revoked")));
        let (tx, mut rx) = mpsc::channel(8);

        tokio::spawn(run_keepalive(keys, params(3), tx));

        match rx.recv().await {
            Some(KeepaliveSignal::Fatal(e)) => assert!(e.is_fatal()),
            other => panic!("expected fatal, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }
}
