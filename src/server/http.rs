//! HTTP listener worker
//!
//! The accept loop has no notion of our cancellation domain, so the worker
//! pairs it with a nested watcher task. The watcher waits for the shared
//! shutdown signal and calls `ListenerHandle::stop`; the loop then stops
//! accepting and drains in-flight connections for at most the drain timeout.
//! Every connection runs in a task owned by the loop, so connections still
//! open at the deadline are aborted before the worker returns.

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::supervisor::{Worker, WorkerContext, WorkerError, WorkerResult};

/// Default time given to in-flight connections after a stop request
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Stop switch for a running listener
///
/// Level-triggered: a stop requested before the server starts serving is
/// still honored.
#[derive(Clone)]
pub struct ListenerHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ListenerHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Ask the listener to stop accepting connections
    ///
    /// Returns `true` only for the first call.
    pub fn stop(&self) -> bool {
        self.sender.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    pub fn is_stopped(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once `stop` has been called
    pub async fn stopped(&self) {
        let mut rx = self.sender.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for ListenerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// How the serve loop returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeExit {
    /// The listener was told to stop and did
    Stopped,
    /// Any other return; escalated as a worker failure
    Unexpected(String),
}

/// Bind the listener on all interfaces
pub async fn bind(port: u16) -> Result<TcpListener, WorkerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .map_err(|e| WorkerError::Bind {
            port,
            message: e.to_string(),
        })
}

/// Errors that only concern the connection being accepted
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// Serve `app` until `handle` is stopped
///
/// After the stop request the listener is closed and open connections get
/// `drain_timeout` to finish; whatever is left is aborted. An accept error
/// that is not tied to a single connection ends the loop as `Unexpected`.
pub async fn serve_until_stopped(
    listener: TcpListener,
    app: Router,
    handle: ListenerHandle,
    drain_timeout: Duration,
) -> ServeExit {
    let builder = AutoBuilder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();

    let accept_error = loop {
        tokio::select! {
            _ = handle.stopped() => break None,
            result = listener.accept() => {
                let (socket, remote_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) if is_connection_error(&e) => {
                        debug!(error = %e, "Failed to accept connection");
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "Listener failed");
                        break Some(e);
                    }
                };

                if let Err(e) = socket.set_nodelay(true) {
                    warn!(error = %e, "Failed to set TCP_NODELAY");
                }

                let service = TowerToHyperService::new(app.clone());
                let conn = builder
                    .serve_connection_with_upgrades(TokioIo::new(socket), service)
                    .into_owned();
                let conn = graceful.watch(conn);

                connections.spawn(async move {
                    if let Err(e) = conn.await {
                        debug!(remote = %remote_addr, error = %e, "Connection closed");
                    }
                });
            }
            // Reap finished connections
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    };

    // No new connections from here on
    drop(listener);

    if tokio::time::timeout(drain_timeout, graceful.shutdown())
        .await
        .is_err()
    {
        warn!(
            remaining = connections.len(),
            drain_secs = drain_timeout.as_secs_f64(),
            "Connections did not drain in time, closing them"
        );
        connections.abort_all();
    }
    while connections.join_next().await.is_some() {}

    match accept_error {
        None => ServeExit::Stopped,
        Some(e) => ServeExit::Unexpected(e.to_string()),
    }
}

/// Run a stoppable serve loop as a supervised worker
///
/// Registers the nested shutdown watcher, then runs `serve` with the handle
/// the watcher stops. Only an unexpected exit is reported as a failure.
pub async fn supervise_listener<F, Fut>(ctx: WorkerContext, serve: F) -> WorkerResult
where
    F: FnOnce(ListenerHandle) -> Fut,
    Fut: Future<Output = ServeExit>,
{
    let handle = ListenerHandle::new();

    let watcher = handle.clone();
    let mut shutdown = ctx.shutdown_signal();
    ctx.spawn_nested("shutdown-watcher", async move {
        shutdown.wait().await;
        if watcher.stop() {
            info!("Stopping HTTP listener");
        }
        Ok(())
    });

    match serve(handle).await {
        ServeExit::Stopped => {
            info!("Server has shut down");
            Ok(())
        }
        ServeExit::Unexpected(message) => Err(WorkerError::Serve(message)),
    }
}

/// Serve `app` on an already bound listener as a supervised worker
pub async fn serve_worker(
    ctx: WorkerContext,
    listener: TcpListener,
    app: Router,
    drain_timeout: Duration,
) -> WorkerResult {
    supervise_listener(ctx, move |handle| {
        serve_until_stopped(listener, app, handle, drain_timeout)
    })
    .await
}

/// Worker that binds `port` and serves `app`
pub fn http_worker(port: u16, app: Router, drain_timeout: Duration) -> Worker {
    Worker::new("http", move |ctx| async move {
        let listener = bind(port).await?;
        // Log after successful bind - server is actually listening
        info!(port = %port, "Listening on HTTP");
        serve_worker(ctx, listener, app, drain_timeout).await
    })
}
