//! Tests for the lifecycle supervisor

use super::supervisor::*;
use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const GRACE: Duration = Duration::from_secs(10);

/// Worker that runs until cancellation, then returns Ok
fn cooperative(name: &str) -> Worker {
    Worker::new(name, |ctx| async move {
        let mut shutdown = ctx.shutdown_signal();
        shutdown.wait().await;
        Ok(())
    })
}

/// Worker that fails immediately
fn failing(name: &str, message: &str) -> Worker {
    let message = message.to_string();
    Worker::new(name, move |_ctx| async move { Err(WorkerError::Other(message)) })
}

/// Worker that ignores cancellation forever
fn hanging(name: &str) -> Worker {
    Worker::new(name, |_ctx| async move {
        pending::<()>().await;
        Ok(())
    })
}

#[tokio::test]
async fn test_supervisor_starts_idle() {
    let supervisor = Supervisor::new();

    assert_eq!(supervisor.state(), SupervisorState::Idle);
    assert!(!supervisor.shutdown_signal().is_shutdown());
}

#[tokio::test]
async fn test_start_moves_to_running() {
    let mut supervisor = Supervisor::new();

    supervisor
        .start([cooperative("a"), cooperative("b")])
        .expect("start should succeed from idle");

    assert_eq!(supervisor.state(), SupervisorState::Running);
    assert_eq!(supervisor.outcome(), SupervisionOutcome::Running);
}

#[tokio::test]
async fn test_start_twice_rejected() {
    let mut supervisor = Supervisor::new();
    supervisor.start([cooperative("a")]).expect("first start");

    let err = supervisor.start([cooperative("b")]).unwrap_err();
    assert_eq!(
        err,
        SupervisorError::InvalidState {
            action: "start workers",
            state: SupervisorState::Running,
        }
    );
}

#[tokio::test]
async fn test_shutdown_before_start_rejected() {
    let mut supervisor = Supervisor::new();

    assert!(supervisor.shutdown(GRACE).await.is_err());
    assert!(supervisor.await_termination(pending::<&str>()).await.is_err());
    assert_eq!(supervisor.state(), SupervisorState::Idle);
}

/// Running -> Cancelling -> TerminatedClean on an external signal
#[tokio::test]
async fn test_external_signal_clean_shutdown() {
    let mut supervisor = Supervisor::new();
    supervisor
        .start([cooperative("a"), cooperative("b"), cooperative("c")])
        .expect("start");

    let reason = supervisor
        .await_termination(async { "SIGTERM" })
        .await
        .expect("await termination");
    assert_eq!(reason, TerminationReason::ExternalSignal("SIGTERM".to_string()));
    assert_eq!(supervisor.state(), SupervisorState::Cancelling);

    let outcome = supervisor.shutdown(GRACE).await.expect("shutdown");
    assert_eq!(outcome, ShutdownOutcome::Clean);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(supervisor.state(), SupervisorState::TerminatedClean);
    assert_eq!(supervisor.outcome(), SupervisionOutcome::AllCompleted);
    assert!(supervisor.shutdown_signal().is_shutdown());
}

#[tokio::test]
async fn test_terminal_state_is_absorbing() {
    let mut supervisor = Supervisor::new();
    supervisor.start([cooperative("a")]).expect("start");
    supervisor.shutdown(GRACE).await.expect("shutdown");

    assert!(supervisor.state().is_terminal());
    assert!(supervisor.shutdown(GRACE).await.is_err());
    assert!(supervisor.start([cooperative("b")]).is_err());
    assert_eq!(supervisor.state(), SupervisorState::TerminatedClean);
}

/// One failure cancels the whole group, whatever else is still running
#[tokio::test]
async fn test_worker_failure_triggers_cancellation() {
    let mut supervisor = Supervisor::new();
    let signal = supervisor.shutdown_signal();
    supervisor
        .start([
            cooperative("a"),
            failing("broken", "listener exploded"),
            cooperative("b"),
        ])
        .expect("start");

    let reason = supervisor
        .await_termination(pending::<&str>())
        .await
        .expect("await termination");

    assert_eq!(
        reason,
        TerminationReason::InternalFailure(WorkerError::Other("listener exploded".to_string()))
    );
    assert!(signal.is_shutdown(), "failure should fire cancellation");
    assert_eq!(supervisor.outcome(), SupervisionOutcome::Failed);

    let outcome = supervisor.shutdown(GRACE).await.expect("shutdown");
    assert_eq!(outcome, ShutdownOutcome::Clean);
    // Failed stays failed after every worker has returned
    assert_eq!(supervisor.outcome(), SupervisionOutcome::Failed);
}

/// Only the first failure is kept; later ones do not fire cancellation again
#[tokio::test]
async fn test_first_failure_wins() {
    let mut supervisor = Supervisor::new();
    let late_failure = Worker::new("late", |ctx| async move {
        let mut shutdown = ctx.shutdown_signal();
        shutdown.wait().await;
        Err(WorkerError::Other("failed during shutdown".to_string()))
    });
    supervisor
        .start([failing("first", "boom"), late_failure])
        .expect("start");

    let reason = supervisor
        .await_termination(pending::<&str>())
        .await
        .expect("await termination");
    assert_eq!(
        reason,
        TerminationReason::InternalFailure(WorkerError::Other("boom".to_string()))
    );

    supervisor.shutdown(GRACE).await.expect("shutdown");
    assert_eq!(supervisor.outcome(), SupervisionOutcome::Failed);
}

/// Each worker observes the cancellation it caused exactly once
#[tokio::test]
async fn test_cancellation_observed_once_per_worker() {
    let observed = Arc::new(AtomicUsize::new(0));
    let mut workers = vec![failing("broken", "boom")];
    for i in 0..4 {
        let observed = observed.clone();
        workers.push(Worker::new(format!("w{}", i), move |ctx| async move {
            let mut shutdown = ctx.shutdown_signal();
            shutdown.wait().await;
            observed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
    }

    let mut supervisor = Supervisor::new();
    supervisor.start(workers).expect("start");
    supervisor
        .await_termination(pending::<&str>())
        .await
        .expect("await termination");
    supervisor.shutdown(GRACE).await.expect("shutdown");

    assert_eq!(observed.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_failure_already_recorded_beats_ready_signal() {
    let mut supervisor = Supervisor::new();
    supervisor.start([failing("broken", "boom")]).expect("start");

    // Let the failing worker run to completion
    tokio::time::timeout(Duration::from_secs(1), async {
        while supervisor.outcome() != SupervisionOutcome::Failed {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("worker should fail");

    let reason = supervisor
        .await_termination(async { "SIGINT" })
        .await
        .expect("await termination");
    assert!(matches!(reason, TerminationReason::InternalFailure(_)));
}

#[tokio::test]
async fn test_panicking_worker_is_a_failure() {
    let mut supervisor = Supervisor::new();
    let panicking = Worker::new("boom", |_ctx| async move {
        if true {
            panic!("kaboom");
        }
        Ok(())
    });
    supervisor.start([panicking, cooperative("a")]).expect("start");

    let reason = supervisor
        .await_termination(pending::<&str>())
        .await
        .expect("await termination");
    assert_eq!(
        reason,
        TerminationReason::InternalFailure(WorkerError::Panicked {
            worker: "boom".to_string(),
            message: "kaboom".to_string(),
        })
    );

    let outcome = supervisor.shutdown(GRACE).await.expect("shutdown");
    assert_eq!(outcome, ShutdownOutcome::Clean);
}

#[tokio::test]
async fn test_all_workers_exiting_ends_supervision() {
    let mut supervisor = Supervisor::new();
    let done = Worker::new("done", |_ctx| async move { Ok(()) });
    supervisor.start([done]).expect("start");

    let reason = supervisor
        .await_termination(pending::<&str>())
        .await
        .expect("await termination");
    assert_eq!(reason, TerminationReason::WorkersExited);
    assert_eq!(supervisor.outcome(), SupervisionOutcome::AllCompleted);

    let outcome = supervisor.shutdown(GRACE).await.expect("shutdown");
    assert_eq!(outcome, ShutdownOutcome::Clean);
}

/// A hung worker forces exit exactly at the grace boundary
#[tokio::test(start_paused = true)]
async fn test_hung_worker_forces_exit_at_grace_boundary() {
    let mut supervisor = Supervisor::new();
    supervisor
        .start([cooperative("a"), hanging("stuck")])
        .expect("start");
    supervisor
        .await_termination(async { "SIGTERM" })
        .await
        .expect("await termination");

    let started = Instant::now();
    let outcome = supervisor.shutdown(GRACE).await.expect("shutdown");
    let elapsed = started.elapsed();

    assert_eq!(outcome, ShutdownOutcome::Forced);
    assert_eq!(outcome.exit_code(), FORCED_EXIT_CODE);
    assert_eq!(outcome.exit_code(), 128);
    assert_eq!(supervisor.state(), SupervisorState::TerminatedForced);
    assert!(elapsed >= GRACE, "forced before the deadline: {:?}", elapsed);
    assert!(
        elapsed < GRACE + Duration::from_millis(100),
        "forced well after the deadline: {:?}",
        elapsed
    );
    assert_eq!(supervisor.outcome(), SupervisionOutcome::Running);
}

/// A slow but finite shutdown inside the grace period is still clean
#[tokio::test(start_paused = true)]
async fn test_slow_worker_within_grace_is_clean() {
    let slow = Worker::new("slow", |ctx| async move {
        let mut shutdown = ctx.shutdown_signal();
        shutdown.wait().await;
        tokio::time::sleep(Duration::from_millis(9_900)).await;
        Ok(())
    });

    let mut supervisor = Supervisor::new();
    supervisor.start([slow]).expect("start");

    let started = Instant::now();
    let outcome = supervisor.shutdown(GRACE).await.expect("shutdown");

    assert_eq!(outcome, ShutdownOutcome::Clean);
    assert!(started.elapsed() < GRACE);
}

/// Nested tasks count towards the group
#[tokio::test(start_paused = true)]
async fn test_nested_task_is_supervised() {
    let parent = Worker::new("parent", |ctx| async move {
        ctx.spawn_nested("child", async move {
            pending::<()>().await;
            Ok(())
        });
        let mut shutdown = ctx.shutdown_signal();
        shutdown.wait().await;
        Ok(())
    });

    let mut supervisor = Supervisor::new();
    supervisor.start([parent]).expect("start");
    tokio::task::yield_now().await;

    let outcome = supervisor.shutdown(GRACE).await.expect("shutdown");
    assert_eq!(outcome, ShutdownOutcome::Forced);
}

#[tokio::test]
async fn test_nested_failure_cancels_group() {
    let parent = Worker::new("parent", |ctx| async move {
        ctx.spawn_nested("child", async move {
            Err(WorkerError::Other("child failed".to_string()))
        });
        let mut shutdown = ctx.shutdown_signal();
        shutdown.wait().await;
        Ok(())
    });

    let mut supervisor = Supervisor::new();
    supervisor.start([parent]).expect("start");

    let reason = supervisor
        .await_termination(pending::<&str>())
        .await
        .expect("await termination");
    assert_eq!(
        reason,
        TerminationReason::InternalFailure(WorkerError::Other("child failed".to_string()))
    );
    assert_eq!(
        supervisor.shutdown(GRACE).await.expect("shutdown"),
        ShutdownOutcome::Clean
    );
}

#[test]
fn test_worker_error_messages() {
    let bind = WorkerError::Bind {
        port: 8080,
        message: "Address already in use".to_string(),
    };
    assert_eq!(
        bind.to_string(),
        "failed to bind listener on port 8080: Address already in use"
    );
    assert_eq!(
        WorkerError::Serve("accept failed".to_string()).to_string(),
        "error whilst serving: accept failed"
    );
}
