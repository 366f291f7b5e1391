//! Debounce timer coalescing bursts of registry changes into one rebuild

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Re-armable timer: every `trigger` restarts the window, the action runs
/// once the window elapses without another trigger
#[derive(Debug, Clone)]
pub struct Debouncer {
    tx: mpsc::UnboundedSender<()>,
}

impl Debouncer {
    /// Spawn the timer task
    ///
    /// The action runs on the timer task, never concurrently with itself.
    /// Dropping every `Debouncer` handle flushes a pending trigger and stops the task.
    pub fn spawn<F, Fut>(window: Duration, mut action: F) -> (Self, JoinHandle<()>)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let handle = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let mut coalesced = 1_u32;
                let closed = loop {
                    match timeout(window, rx.recv()).await {
                        Ok(Some(())) => coalesced += 1,
                        Ok(None) => break true,
                        Err(_) => break false,
                    }
                };

                tracing::debug!(coalesced, "debounce window elapsed");
                action().await;

                if closed {
                    break;
                }
            }
        });

        (Self { tx }, handle)
    }

    /// Arm (or re-arm) the timer
    pub fn trigger(&self) {
        if self.tx.send(()).is_err() {
            tracing::warn!("debounce task has stopped, trigger dropped");
        }
    }
}
