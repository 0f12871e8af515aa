//! Process lifecycle supervision
//!
//! The supervisor owns the cancellation domain for the whole exporter. It
//! spawns every long-running worker into one `TaskGroup`, waits for either an
//! external termination trigger or the first worker failure, then fires the
//! shared shutdown signal and gives the group a bounded grace period to
//! finish.
//!
//! State machine:
//! `Idle -> Running -> Cancelling -> {TerminatedClean | TerminatedForced}`

use futures::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::shutdown::{shutdown_channel, ShutdownController, ShutdownSignal};

/// Default grace period between cancellation and forced exit
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Exit status used when workers do not finish within the grace period
pub const FORCED_EXIT_CODE: i32 = 128;

/// Why a worker stopped with an error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("failed to bind listener on port {port}: {message}")]
    Bind { port: u16, message: String },

    #[error("error whilst serving: {0}")]
    Serve(String),

    #[error("worker {worker} panicked: {message}")]
    Panicked { worker: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Completion outcome of a single worker
pub type WorkerResult = Result<(), WorkerError>;

/// Misuse of the supervisor API
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("supervisor cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: SupervisorState,
    },
}

/// Lifecycle state of the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running,
    Cancelling,
    TerminatedClean,
    TerminatedForced,
}

impl SupervisorState {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::TerminatedClean | Self::TerminatedForced)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::TerminatedClean => "terminated (clean)",
            Self::TerminatedForced => "terminated (forced)",
        };
        f.write_str(name)
    }
}

/// Aggregate state of every task registered in a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionOutcome {
    /// At least one task is still active and none has failed
    Running,
    /// Every task returned and none failed
    AllCompleted,
    /// At least one task returned an error
    Failed,
}

/// Why `await_termination` returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The external trigger fired (usually an OS signal)
    ExternalSignal(String),
    /// A worker failed; carries the first recorded failure
    InternalFailure(WorkerError),
    /// Every worker returned successfully before anything else happened
    WorkersExited,
}

/// Result of the bounded shutdown phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// All workers finished inside the grace period
    Clean,
    /// The grace period elapsed with workers still active
    Forced,
}

impl ShutdownOutcome {
    /// Process exit status for this outcome
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::Forced => FORCED_EXIT_CODE,
        }
    }
}

#[derive(Debug, Default)]
struct GroupState {
    active: usize,
    spawned: usize,
    failure: Option<WorkerError>,
}

/// Tracks a set of spawned tasks as a single unit
///
/// The first task that returns an error is recorded and fires the shared
/// shutdown signal. Later failures are logged but never fire it again.
#[derive(Clone)]
pub struct TaskGroup {
    state: Arc<watch::Sender<GroupState>>,
    controller: Arc<ShutdownController>,
}

impl TaskGroup {
    fn new(controller: Arc<ShutdownController>) -> Self {
        let (state, _) = watch::channel(GroupState::default());
        Self {
            state: Arc::new(state),
            controller,
        }
    }

    /// Spawn a task whose outcome becomes part of the group outcome
    ///
    /// A panic inside the task is caught and recorded as a failure.
    pub fn spawn<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = WorkerResult> + Send + 'static,
    {
        let name = name.into();
        self.state.send_modify(|s| {
            s.active += 1;
            s.spawned += 1;
        });
        debug!(worker = %name, "Worker started");

        let group = self.clone();
        tokio::spawn(async move {
            let result = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(WorkerError::Panicked {
                    worker: name.clone(),
                    message: panic_message(panic.as_ref()),
                }),
            };
            group.record(&name, result);
        });
    }

    fn record(&self, name: &str, result: WorkerResult) {
        let mut first_failure = false;
        self.state.send_modify(|s| {
            s.active = s.active.saturating_sub(1);
            if let Err(e) = &result {
                if s.failure.is_none() {
                    s.failure = Some(e.clone());
                    first_failure = true;
                }
            }
        });

        match result {
            Ok(()) => debug!(worker = %name, "Worker finished"),
            Err(e) => error!(worker = %name, error = %e, "Worker failed"),
        }

        if first_failure {
            self.controller.shutdown();
        }
    }

    /// Current aggregate outcome
    pub fn outcome(&self) -> SupervisionOutcome {
        let state = self.state.borrow();
        if state.failure.is_some() {
            SupervisionOutcome::Failed
        } else if state.active == 0 {
            SupervisionOutcome::AllCompleted
        } else {
            SupervisionOutcome::Running
        }
    }

    /// Number of tasks that have not returned yet
    pub fn active(&self) -> usize {
        self.state.borrow().active
    }

    /// Number of tasks ever spawned into this group
    pub fn spawned(&self) -> usize {
        self.state.borrow().spawned
    }

    /// First failure recorded by the group, if any
    pub fn failure(&self) -> Option<WorkerError> {
        self.state.borrow().failure.clone()
    }

    /// Wait until some task has failed and return the first failure
    pub async fn failed(&self) -> WorkerError {
        let mut rx = self.state.subscribe();
        let failure = rx
            .wait_for(|s| s.failure.is_some())
            .await
            .ok()
            .and_then(|s| s.failure.clone());
        match failure {
            Some(e) => e,
            // The sender lives as long as `self`, so this never happens
            None => std::future::pending().await,
        }
    }

    /// Wait until every spawned task has returned
    pub async fn all_completed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| s.active == 0).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle given to each worker when it starts
#[derive(Clone)]
pub struct WorkerContext {
    name: String,
    shutdown: ShutdownSignal,
    group: TaskGroup,
}

impl WorkerContext {
    /// Name the worker was registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Observer for the shared cancellation signal
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Register a nested task in the same group
    ///
    /// Intended for shutdown helpers such as a watcher that stops a listener
    /// once cancellation fires.
    pub fn spawn_nested<F>(&self, name: &str, task: F)
    where
        F: Future<Output = WorkerResult> + Send + 'static,
    {
        self.group.spawn(format!("{}/{}", self.name, name), task);
    }
}

type WorkerFn = Box<dyn FnOnce(WorkerContext) -> BoxFuture<'static, WorkerResult> + Send>;

/// A named worker factory
pub struct Worker {
    name: String,
    run: WorkerFn,
}

impl Worker {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(WorkerContext) -> Fut + Send + 'static,
        Fut: Future<Output = WorkerResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(move |ctx| run(ctx).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker").field("name", &self.name).finish()
    }
}

/// Owner of the cancellation domain and the termination protocol
pub struct Supervisor {
    state: SupervisorState,
    controller: Arc<ShutdownController>,
    signal: ShutdownSignal,
    group: TaskGroup,
}

impl Supervisor {
    pub fn new() -> Self {
        let (controller, signal) = shutdown_channel();
        let controller = Arc::new(controller);
        let group = TaskGroup::new(controller.clone());
        Self {
            state: SupervisorState::Idle,
            controller,
            signal,
            group,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn outcome(&self) -> SupervisionOutcome {
        self.group.outcome()
    }

    /// Observer for the shared cancellation signal
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Spawn every worker into the group (`Idle -> Running`)
    pub fn start<I>(&mut self, workers: I) -> Result<(), SupervisorError>
    where
        I: IntoIterator<Item = Worker>,
    {
        self.expect_state("start workers", &[SupervisorState::Idle])?;

        for worker in workers {
            let ctx = WorkerContext {
                name: worker.name.clone(),
                shutdown: self.signal.clone(),
                group: self.group.clone(),
            };
            info!(worker = %worker.name, "Starting worker");
            self.group.spawn(worker.name, (worker.run)(ctx));
        }

        self.state = SupervisorState::Running;
        Ok(())
    }

    /// Wait for an external trigger or the first worker failure
    ///
    /// Moves the supervisor to `Cancelling`. A failure that is already
    /// recorded wins over a trigger that is ready at the same time.
    pub async fn await_termination<F>(
        &mut self,
        trigger: F,
    ) -> Result<TerminationReason, SupervisorError>
    where
        F: Future,
        F::Output: fmt::Display,
    {
        self.expect_state("await termination", &[SupervisorState::Running])?;

        let group = self.group.clone();
        let reason = tokio::select! {
            biased;
            failure = group.failed() => {
                info!(error = %failure, "Worker failure, shutting down");
                TerminationReason::InternalFailure(failure)
            }
            signal = trigger => {
                info!(signal = %signal, "Received termination request, shutting down");
                TerminationReason::ExternalSignal(signal.to_string())
            }
            _ = group.all_completed() => {
                info!("All workers exited, shutting down");
                TerminationReason::WorkersExited
            }
        };

        self.state = SupervisorState::Cancelling;
        Ok(reason)
    }

    /// Fire cancellation and wait up to `grace` for every worker
    pub async fn shutdown(&mut self, grace: Duration) -> Result<ShutdownOutcome, SupervisorError> {
        self.expect_state(
            "shut down",
            &[SupervisorState::Running, SupervisorState::Cancelling],
        )?;
        self.state = SupervisorState::Cancelling;
        self.controller.shutdown();

        info!(
            grace_secs = grace.as_secs_f64(),
            active = self.group.active(),
            "Waiting for workers to stop"
        );

        match tokio::time::timeout(grace, self.group.all_completed()).await {
            Ok(()) => {
                info!("Goodbye!");
                self.state = SupervisorState::TerminatedClean;
                Ok(ShutdownOutcome::Clean)
            }
            Err(_) => {
                warn!(
                    active = self.group.active(),
                    "Did not gracefully terminate in time, force exiting"
                );
                self.state = SupervisorState::TerminatedForced;
                Ok(ShutdownOutcome::Forced)
            }
        }
    }

    fn expect_state(
        &self,
        action: &'static str,
        allowed: &[SupervisorState],
    ) -> Result<(), SupervisorError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SupervisorError::InvalidState {
                action,
                state: self.state,
            })
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
