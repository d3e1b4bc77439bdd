use tokio::sync::watch;

/// Cooperative cancellation signal observed at every suspension point of the
/// consumer.
///
/// Wraps an optional `watch::Receiver<bool>`; sending `true` requests shutdown.
/// Without a receiver, or once the sender is dropped without signalling,
/// `cancelled()` never resolves.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

impl From<watch::Receiver<bool>> for ShutdownSignal {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancelled_resolves_after_signal() {
        let (tx, rx) = watch::channel(false);
        let mut signal = ShutdownSignal::new(rx);
        assert!(!signal.is_triggered());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(true);
        });

        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .expect("signal should fire");
        assert!(signal.is_triggered());

        // Stays cancelled once observed
        tokio::time::timeout(Duration::from_millis(50), signal.cancelled())
            .await
            .expect("signal should stay fired");
    }

    #[tokio::test]
    async fn test_never_does_not_resolve() {
        let mut signal = ShutdownSignal::never();
        let result = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_cancel() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let mut signal = ShutdownSignal::new(rx);
        let result = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(result.is_err());
    }
}
