//! HTTP endpoints and process lifecycle
//!
//! Endpoints:
//! - `/` - Banner with version and commit
//! - `/healthz` - Upstream health probe
//! - `/metrics` - Prometheus metrics
//!
//! Also provides the supervisor that runs every worker under one
//! cancellation domain and handles SIGTERM/SIGINT.

mod health;
mod http;
mod metrics;
pub mod shutdown;
pub mod supervisor;

pub use health::{build_router, ServerState};
pub use http::{
    bind, http_worker, serve_until_stopped, serve_worker, supervise_listener, ListenerHandle,
    ServeExit, DEFAULT_DRAIN_TIMEOUT,
};
pub use metrics::{create_metrics, ExporterMetrics, SharedMetrics};
pub use shutdown::{shutdown_channel, ShutdownController, ShutdownSignal, TerminationSignals};
pub use supervisor::{
    ShutdownOutcome, SupervisionOutcome, Supervisor, SupervisorError, SupervisorState, TaskGroup,
    TerminationReason, Worker, WorkerContext, WorkerError, WorkerResult, DEFAULT_SHUTDOWN_GRACE,
    FORCED_EXIT_CODE,
};

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "http_test.rs"]
mod http_tests;

#[cfg(test)]
#[path = "metrics_test.rs"]
mod metrics_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod supervisor_tests;
