//! Process lifecycle: pipeline and local API as two peer tasks.
//!
//! Both tasks share one cancellation token. Whichever finishes first (for
//! any reason, including a panic) cancels the token through a drop guard so
//! its sibling winds down. An interrupt cancels the token and starts the
//! grace period; tasks still running when it elapses are aborted.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::PipelineOutcome;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(5000);

/// How the process wound down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Both tasks finished without an interrupt
    Finished,

    /// Interrupted; both tasks finished within the grace period
    Graceful,

    /// Interrupted; tasks were aborted after the grace period
    GraceExceeded,
}

#[derive(Debug)]
pub struct LifecycleReport {
    pub shutdown: Shutdown,

    /// `None` when the pipeline task panicked or was aborted
    pub pipeline: Option<PipelineOutcome>,

    pub server_error: Option<String>,
}

impl LifecycleReport {
    pub fn exit_code(&self) -> i32 {
        if self.shutdown == Shutdown::GraceExceeded {
            return 2;
        }
        match &self.pipeline {
            Some(outcome) if !outcome.is_failure() && self.server_error.is_none() => 0,
            _ => 1,
        }
    }
}

pub struct Lifecycle {
    cancel: CancellationToken,
    grace: Duration,
}

impl Lifecycle {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            grace: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run both tasks until they finish or `interrupt` resolves
    pub async fn run<P, S, I>(&self, pipeline: P, server: S, interrupt: I) -> LifecycleReport
    where
        P: Future<Output = PipelineOutcome> + Send + 'static,
        S: Future<Output = anyhow::Result<()>> + Send + 'static,
        I: Future<Output = ()>,
    {
        let pipeline_guard = self.cancel.clone().drop_guard();
        let pipeline_task = tokio::spawn(async move {
            let _guard = pipeline_guard;
            pipeline.await
        });

        let server_guard = self.cancel.clone().drop_guard();
        let server_task = tokio::spawn(async move {
            let _guard = server_guard;
            server.await
        });

        let pipeline_abort = pipeline_task.abort_handle();
        let server_abort = server_task.abort_handle();

        let both = async { tokio::join!(pipeline_task, server_task) };
        tokio::pin!(both);
        tokio::pin!(interrupt);

        let (shutdown, joined) = tokio::select! {
            joined = &mut both => (Shutdown::Finished, Some(joined)),
            _ = &mut interrupt => {
                info!(
                    grace_ms = self.grace.as_millis() as u64,
                    "Interrupt received, shutting down"
                );
                self.cancel.cancel();

                match tokio::time::timeout(self.grace, &mut both).await {
                    Ok(joined) => (Shutdown::Graceful, Some(joined)),
                    Err(_) => {
                        error!(
                            grace_ms = self.grace.as_millis() as u64,
                            "graceful timeout exceeded"
                        );
                        pipeline_abort.abort();
                        server_abort.abort();
                        (Shutdown::GraceExceeded, None)
                    }
                }
            }
        };

        let Some((pipeline, server)) = joined else {
            return LifecycleReport {
                shutdown,
                pipeline: None,
                server_error: None,
            };
        };

        LifecycleReport {
            shutdown,
            pipeline: pipeline_outcome(pipeline),
            server_error: server_error(server),
        }
    }
}

fn pipeline_outcome(joined: Result<PipelineOutcome, JoinError>) -> Option<PipelineOutcome> {
    match joined {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!(error = %e, "Pipeline task did not complete");
            None
        }
    }
}

fn server_error(joined: Result<anyhow::Result<()>, JoinError>) -> Option<String> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            warn!(error = %format!("{:#}", e), "Local API server failed");
            Some(format!("{:#}", e))
        }
        Err(e) => {
            error!(error = %e, "Local API server task did not complete");
            Some(e.to_string())
        }
    }
}

/// Resolves on SIGINT (or SIGTERM on unix)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
