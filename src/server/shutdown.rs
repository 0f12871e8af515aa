//! Cancellation domain shared by every supervised worker
//!
//! A single `ShutdownController` owns the stop flag; any number of
//! `ShutdownSignal` clones observe it. Firing is one-shot and irreversible:
//! once the flag is set it stays set, and later calls are no-ops.
//!
//! OS termination signals are registered separately through
//! `TerminationSignals` so that the supervisor only sees them as one
//! possible external trigger.

use tokio::sync::watch;
use tracing::info;

/// Observer side of the cancellation domain
///
/// Cheap to clone; every clone sees the same flag.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for shutdown signal
    ///
    /// Returns immediately if shutdown already fired.
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                // Controller dropped, treat as shutdown
                break;
            }
        }
    }

    /// Check if shutdown was signaled (non-blocking)
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Owner side of the cancellation domain
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    /// Fire the shutdown signal
    ///
    /// Returns `true` only for the call that actually moved the flag from
    /// live to cancelled.
    pub fn shutdown(&self) -> bool {
        let fired = self.sender.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });
        if fired {
            info!("Shutdown signal sent");
        }
        fired
    }

    /// Check if shutdown was already fired
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Create another observer for this controller
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Create a new shutdown signal pair
///
/// Returns (controller, signal) where:
/// - controller: Used to trigger shutdown
/// - signal: Cloned and passed to components that need to listen
pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// SIGTERM / SIGINT listeners, registered up front
///
/// Registration happens in `register` so a failure surfaces at startup
/// instead of inside the supervision wait.
#[cfg(unix)]
pub struct TerminationSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    /// Install handlers for SIGTERM and SIGINT
    pub fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next SIGTERM or SIGINT
    ///
    /// Returns the signal name that was received.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => {
                info!("Received SIGTERM");
                "SIGTERM"
            }
            _ = self.sigint.recv() => {
                info!("Received SIGINT");
                "SIGINT"
            }
        }
    }
}

/// Ctrl+C listener (Windows)
#[cfg(not(unix))]
pub struct TerminationSignals {
    _private: (),
}

#[cfg(not(unix))]
impl TerminationSignals {
    pub fn register() -> std::io::Result<Self> {
        Ok(Self { _private: () })
    }

    pub async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to wait for Ctrl+C");
            // Never resolve; the supervisor can still terminate on worker failure.
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C");
        "CTRL_C"
    }
}
