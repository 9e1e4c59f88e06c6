//! Cooperative shutdown for the pipeline and HTTP server.
//!
//! A single [`ShutdownCoordinator`] is created by the composition root.
//! Every long-running task holds a [`ShutdownListener`] and stops starting
//! new work once it fires.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info};

/// What triggered the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownSignal {
    /// SIGTERM signal received
    Sigterm,
    /// SIGINT signal received (Ctrl+C)
    Sigint,
    /// Programmatic shutdown requested
    Programmatic,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sigterm => write!(f, "SIGTERM"),
            Self::Sigint => write!(f, "SIGINT"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// Owner of the shutdown trigger.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    tx: watch::Sender<Option<ShutdownSignal>>,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// A listener that observes this coordinator.
    #[must_use]
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Whether shutdown has been initiated.
    #[must_use]
    pub fn is_shutdown_initiated(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Trigger shutdown. Only the first call has an effect; returns whether
    /// this call was it.
    pub fn initiate(&self, signal: ShutdownSignal) -> bool {
        let first = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(signal);
            true
        });

        if first {
            info!(signal = %signal, listeners = self.tx.receiver_count(), "initiating graceful shutdown");
        } else {
            info!(signal = %signal, "shutdown already in progress, ignoring duplicate signal");
        }
        first
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`ShutdownCoordinator`].
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownListener {
    /// Whether shutdown has been initiated.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The signal that triggered shutdown, if any.
    #[must_use]
    pub fn signal(&self) -> Option<ShutdownSignal> {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is initiated.
    ///
    /// Also resolves if the coordinator is dropped, since nothing can
    /// trigger it afterwards.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(Option::is_some).await;
    }
}

/// Install OS signal handlers (SIGTERM, SIGINT) that initiate shutdown.
pub fn install_signal_handlers(
    coordinator: Arc<ShutdownCoordinator>,
) -> tokio::task::JoinHandle<()> {
    info!("installing OS signal handlers");

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };

            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    coordinator.initiate(ShutdownSignal::Sigterm);
                }
                _ = sigint.recv() => {
                    coordinator.initiate(ShutdownSignal::Sigint);
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            coordinator.initiate(ShutdownSignal::Sigint);
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_coordinator_creation() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutdown_initiated());
        assert!(!coordinator.listener().is_triggered());
    }

    #[test]
    fn test_duplicate_shutdown_ignored() {
        let coordinator = ShutdownCoordinator::new();

        assert!(coordinator.initiate(ShutdownSignal::Programmatic));
        assert!(!coordinator.initiate(ShutdownSignal::Sigterm));
        assert_eq!(
            coordinator.listener().signal(),
            Some(ShutdownSignal::Programmatic)
        );
    }

    #[tokio::test]
    async fn test_listener_created_before_trigger_wakes() {
        let coordinator = ShutdownCoordinator::new();
        let mut listener = coordinator.listener();

        let waiter = tokio::spawn(async move {
            listener.wait().await;
            listener.signal()
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.initiate(ShutdownSignal::Sigint);

        let signal = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("listener should wake")
            .unwrap();
        assert_eq!(signal, Some(ShutdownSignal::Sigint));
    }

    #[tokio::test]
    async fn test_listener_created_after_trigger_resolves_immediately() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.initiate(ShutdownSignal::Programmatic);

        let mut listener = coordinator.listener();
        tokio::time::timeout(Duration::from_millis(100), listener.wait())
            .await
            .expect("already triggered");
        assert!(listener.is_triggered());
    }

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Sigterm.to_string(), "SIGTERM");
        assert_eq!(ShutdownSignal::Sigint.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Programmatic.to_string(), "PROGRAMMATIC");
    }
}
