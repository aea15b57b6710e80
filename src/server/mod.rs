//! Local read-only API for the container supervisor.
//!
//! ```text
//! GET /health  - liveness
//! GET /status  - latest run snapshot
//! ```
//!
//! Handlers only read the latest snapshot from a watch channel, so they
//! stay responsive while the pipeline is busy.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::StatusSnapshot;

#[derive(Clone)]
struct ApiState {
    status: watch::Receiver<StatusSnapshot>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

pub fn router(status: watch::Receiver<StatusSnapshot>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(run_status))
        .with_state(ApiState { status })
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn run_status(State(state): State<ApiState>) -> Json<StatusSnapshot> {
    Json(state.status.borrow().clone())
}

/// Bind the API listener on all interfaces
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind local API on {}", addr))
}

/// Serve until `cancel` fires
pub async fn serve(
    listener: TcpListener,
    status: watch::Receiver<StatusSnapshot>,
    cancel: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Local API listening");
    }

    axum::serve(listener, router(status))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("Local API server failed")?;

    info!("Local API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunState;

    #[tokio::test]
    async fn test_health_and_status() {
        let (tx, rx) = watch::channel(StatusSnapshot::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, rx, cancel.clone()));

        let client = reqwest::Client::new();
        let health: serde_json::Value = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        tx.send_replace(StatusSnapshot {
            state: RunState::Completed,
            ..StatusSnapshot::default()
        });
        let status: serde_json::Value = client
            .get(format!("http://{}/status", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["state"], "completed");
        assert_eq!(status["stages"].as_array().unwrap().len(), 8);

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
