//! Run-wide shutdown signal.
//!
//! A broadcast channel wakes waiters; a sticky flag lets late subscribers
//! and synchronous checks observe a shutdown that already happened.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Triggers shutdown for every [`ShutdownSignal`] derived from it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
    flag: Arc<AtomicBool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
            flag: Arc::clone(&self.flag),
        }
    }
}

/// Receiving side of a [`ShutdownHandle`].
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: broadcast::Receiver<()>,
    flag: Arc<AtomicBool>,
}

impl Clone for ShutdownSignal {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.resubscribe(),
            flag: Arc::clone(&self.flag),
        }
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown is triggered. Never resolves if every handle
    /// is dropped without triggering.
    pub async fn triggered(&mut self) {
        if self.is_triggered() {
            return;
        }
        match self.rx.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => {
                if !self.is_triggered() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let handle = ShutdownHandle::new();
        let mut signal = handle.signal();
        let waiter = tokio::spawn(async move {
            signal.triggered().await;
        });
        handle.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_late_signal_sees_trigger() {
        let handle = ShutdownHandle::new();
        handle.trigger();
        handle.trigger();
        let mut late = handle.signal();
        assert!(late.is_triggered());
        tokio::time::timeout(Duration::from_millis(100), late.triggered())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_untriggered_signal_stays_pending() {
        let handle = ShutdownHandle::new();
        let mut signal = handle.signal().clone();
        drop(handle);
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.triggered()).await;
        assert!(waited.is_err());
    }
}
