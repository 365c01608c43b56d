//! The consumer end of an update stream.
//!
//! A transport task pushes raw frames into a bounded channel through a
//! [`FrameSender`]; the supervisor's consumer task drains the matching
//! [`Subscription`]. The channel closing is the StreamClosed signal,
//! whichever side caused it.

use balsync_types::SubscriptionId;
use tokio::sync::mpsc;

/// Receiving half of one stream subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    frames: mpsc::Receiver<String>,
}

/// Sending half, held by the transport.
#[derive(Debug, Clone)]
pub struct FrameSender {
    id: SubscriptionId,
    frames: mpsc::Sender<String>,
}

impl Subscription {
    /// Create a connected sender/subscription pair with room for `buffer` frames.
    #[must_use]
    pub fn channel(buffer: usize) -> (FrameSender, Self) {
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            FrameSender { id, frames: tx },
            Self { id, frames: rx },
        )
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next raw frame, or `None` once the stream has closed.
    ///
    /// Cancel-safe, so it can sit in a `tokio::select!` arm.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    /// Close from the consumer side. The transport sees its sends fail.
    pub fn close(&mut self) {
        self.frames.close();
    }
}

impl FrameSender {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Deliver one frame, waiting for buffer space.
    ///
    /// Returns `false` once the subscription has been closed or dropped.
    pub async fn send(&self, frame: impl Into<String>) -> bool {
        self.frames.send(frame.into()).await.is_ok()
    }

    /// Whether the consumer side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }

    /// Resolves when the consumer closes or drops the subscription.
    pub async fn closed(&self) {
        self.frames.closed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_in_order() {
        let (tx, mut sub) = Subscription::channel(4);
        assert_eq!(tx.id(), sub.id());
        assert!(tx.send("a").await);
        assert!(tx.send("b").await);
        assert_eq!(sub.next_frame().await.as_deref(), Some("a"));
        assert_eq!(sub.next_frame().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn dropping_sender_closes_stream() {
        let (tx, mut sub) = Subscription::channel(4);
        tx.send("last").await;
        drop(tx);
        assert_eq!(sub.next_frame().await.as_deref(), Some("last"));
        assert_eq!(sub.next_frame().await, None);
    }

    #[tokio::test]
    async fn consumer_close_is_visible_to_transport() {
        let (tx, mut sub) = Subscription::channel(4);
        sub.close();
        assert!(tx.is_closed());
        assert!(!tx.send("late").await);
        tx.closed().await;
    }
}
