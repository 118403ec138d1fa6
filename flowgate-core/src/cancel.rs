//! One-shot cancellation signal.
//!
//! Every blocking operation in the runtime (cross-pipeline commit, claim,
//! respond, source-plugin I/O) accepts a [`Cancellation`] and must return
//! promptly once it fires. Timeouts are expressed by firing a cancellation
//! from a timer, so the runtime has a single suspension-interruption
//! primitive.

use std::sync::Arc;
use tokio::sync::watch;

/// A clonable, one-shot cancellation signal.
///
/// All clones observe the same signal. Cancelling is idempotent and cannot
/// be undone.
#[derive(Clone, Debug)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
}

impl Cancellation {
    /// Create a new, unfired signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal, waking every waiter.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Check whether the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // Cannot fail: we hold the sender for the receiver's whole lifetime.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_unfired() {
        let c = Cancellation::new();
        assert!(!c.is_cancelled());
        c.cancel();
        assert!(c.is_cancelled());
        // Idempotent.
        c.cancel();
        assert!(c.is_cancelled());
    }

    #[test]
    fn clones_share_the_signal() {
        let a = Cancellation::new();
        let b = a.clone();
        b.cancel();
        assert!(a.is_cancelled());
    }

    #[tokio::test]
    async fn wakes_waiters() {
        let c = Cancellation::new();
        let waiter = c.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        c.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn returns_immediately_when_already_fired() {
        let c = Cancellation::new();
        c.cancel();
        tokio::time::timeout(Duration::from_millis(100), c.cancelled())
            .await
            .expect("should not block");
    }
}
