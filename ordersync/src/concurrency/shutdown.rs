//! Broadcast-based shutdown signaling.
//!
//! A single [`ShutdownTx`] notifies every worker that the process is shutting down.
//! Workers hold a [`ShutdownRx`] and poll it at each suspension point, either by
//! checking [`ShutdownRx::is_shutdown`] before starting work or by awaiting
//! [`ShutdownRx::wait_for_shutdown`] inside a `tokio::select!`.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
///
/// Cloneable so that the owning pipeline can hand out additional transmitters, for
/// example to an OS signal handler.
#[derive(Debug, Clone)]
pub struct ShutdownTx {
    tx: watch::Sender<bool>,
}

impl ShutdownTx {
    /// Signals shutdown to all subscribed receivers.
    ///
    /// Fails only when every receiver has already been dropped, which means there is
    /// nothing left to shut down.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<bool>> {
        self.tx.send(true)
    }

    /// Creates a new receiver subscribed to this transmitter.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiver side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx {
    rx: watch::Receiver<bool>,
}

impl ShutdownRx {
    /// Returns `true` if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until shutdown is signaled.
    ///
    /// Resolves immediately when shutdown was already signaled, which makes it safe
    /// to use in `tokio::select!` arms that race against long sleeps.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.rx.clone();

        // The sender lives in the pipeline for the whole process lifetime; if it is
        // gone we treat that as shutdown as well.
        let _ = rx.wait_for(|shutdown| *shutdown).await;
    }
}

/// Creates a connected shutdown channel pair.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);

    (ShutdownTx { tx }, ShutdownRx { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_is_observed_by_all_receivers() {
        let (tx, rx) = create_shutdown_channel();
        let other_rx = tx.subscribe();

        assert!(!rx.is_shutdown());
        assert!(!other_rx.is_shutdown());

        tx.shutdown().unwrap();

        assert!(rx.is_shutdown());
        assert!(other_rx.is_shutdown());
        rx.wait_for_shutdown().await;
        other_rx.wait_for_shutdown().await;
    }
}
