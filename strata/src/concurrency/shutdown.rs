//! Shutdown signaling for the pipeline and its workers.
//!
//! Built on a watch channel of unit values: the transmitter is held by the
//! pipeline, every worker holds a receiver and reacts to the change
//! notification. Workers finish their in-flight table commit before exiting,
//! so shutdown never leaves a table half-staged.

use tokio::sync::watch;

use crate::error::{ErrorKind, StrataResult};
use crate::strata_error;

/// Transmitter side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

/// Receiver side of the shutdown channel.
pub type ShutdownRx = watch::Receiver<()>;

impl ShutdownTx {
    /// Signals shutdown to all subscribed receivers.
    pub fn shutdown(&self) -> StrataResult<()> {
        self.0.send(()).map_err(|_| {
            strata_error!(
                ErrorKind::InvalidState,
                "Shutdown signal could not be delivered",
                "all receivers were dropped"
            )
        })
    }

    /// Creates a new receiver attached to this transmitter.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Creates the shutdown channel for one pipeline.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, mut rx) = watch::channel(());
    // The initial value is not a signal.
    rx.borrow_and_update();
    (ShutdownTx(tx), rx)
}

/// Returns `true` once shutdown has been signaled on `rx`.
pub fn is_shutdown(rx: &mut ShutdownRx) -> bool {
    rx.has_changed().unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receivers_observe_the_signal() {
        let (tx, mut rx) = create_shutdown_channel();
        assert!(!is_shutdown(&mut rx));

        let mut late = tx.subscribe();
        tx.shutdown().unwrap();

        assert!(is_shutdown(&mut rx));
        late.changed().await.unwrap();
    }
}
