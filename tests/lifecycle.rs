//! Lifecycle Integration Tests
//!
//! Pipeline and server tasks under one token: normal completion, graceful
//! interrupt, grace-period overrun and exit codes.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nucleus::core::{Lifecycle, Shutdown, DEFAULT_GRACE_PERIOD};
use nucleus::domain::{PipelineOutcome, Run, RunState, StageKind, StageStatus};

fn outcome(terminal: RunState) -> PipelineOutcome {
    let mut run = Run::new(Uuid::new_v4());
    if terminal == RunState::FatalAborted {
        run.end(
            StageKind::Fetch,
            StageStatus::Failed {
                error: "boom".into(),
            },
            1,
        );
    }
    run.finish(terminal).unwrap();
    run.finalize()
}

/// Server stand-in that runs until the token fires
fn server(
    cancel: &CancellationToken,
) -> impl std::future::Future<Output = anyhow::Result<()>> + Send + 'static {
    let cancel = cancel.clone();
    async move {
        cancel.cancelled().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_pipeline_finishing_stops_server() {
    let cancel = CancellationToken::new();
    let lifecycle = Lifecycle::new(cancel.clone());

    let report = lifecycle
        .run(
            async { outcome(RunState::Completed) },
            server(&cancel),
            std::future::pending::<()>(),
        )
        .await;

    assert_eq!(report.shutdown, Shutdown::Finished);
    assert!(report.pipeline.is_some());
    assert_eq!(report.exit_code(), 0);
    assert!(cancel.is_cancelled());
}

#[tokio::test]
async fn test_interrupt_within_grace_is_graceful() {
    let cancel = CancellationToken::new();
    let lifecycle = Lifecycle::new(cancel.clone());

    let pipeline_cancel = cancel.clone();
    let report = lifecycle
        .run(
            async move {
                pipeline_cancel.cancelled().await;
                outcome(RunState::Cancelled)
            },
            server(&cancel),
            tokio::time::sleep(Duration::from_millis(20)),
        )
        .await;

    assert_eq!(report.shutdown, Shutdown::Graceful);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_grace_exceeded_forces_shutdown() {
    let cancel = CancellationToken::new();
    let lifecycle = Lifecycle::new(cancel.clone()).with_grace_period(Duration::from_millis(100));

    let started = Instant::now();
    let report = lifecycle
        .run(
            async {
                // Ignores cancellation
                tokio::time::sleep(Duration::from_secs(60)).await;
                outcome(RunState::Completed)
            },
            server(&cancel),
            tokio::time::sleep(Duration::from_millis(10)),
        )
        .await;

    assert_eq!(report.shutdown, Shutdown::GraceExceeded);
    assert!(report.pipeline.is_none());
    assert_eq!(report.exit_code(), 2);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_failed_outcome_exits_one() {
    let cancel = CancellationToken::new();
    let lifecycle = Lifecycle::new(cancel.clone());

    let report = lifecycle
        .run(
            async { outcome(RunState::FatalAborted) },
            server(&cancel),
            std::future::pending::<()>(),
        )
        .await;

    assert_eq!(report.shutdown, Shutdown::Finished);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_pipeline_panic_still_releases_server() {
    let cancel = CancellationToken::new();
    let lifecycle = Lifecycle::new(cancel.clone());

    let report = lifecycle
        .run(
            async {
                if true {
                    panic!("stage bug");
                }
                outcome(RunState::Completed)
            },
            server(&cancel),
            std::future::pending::<()>(),
        )
        .await;

    assert_eq!(report.shutdown, Shutdown::Finished);
    assert!(report.pipeline.is_none());
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_server_failure_cancels_pipeline() {
    let cancel = CancellationToken::new();
    let lifecycle = Lifecycle::new(cancel.clone());

    let pipeline_cancel = cancel.clone();
    let report = lifecycle
        .run(
            async move {
                pipeline_cancel.cancelled().await;
                outcome(RunState::Cancelled)
            },
            async { Err(anyhow::anyhow!("address in use")) },
            std::future::pending::<()>(),
        )
        .await;

    assert_eq!(report.shutdown, Shutdown::Finished);
    assert!(report.server_error.unwrap().contains("address in use"));
}

#[test]
fn test_default_grace_period() {
    assert_eq!(DEFAULT_GRACE_PERIOD, Duration::from_millis(5000));
}
