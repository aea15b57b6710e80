//! HTTP client for the remote control plane.
//!
//! The endpoint is resolved once from configuration (local runner host or
//! the built-in remote host) and handed in at construction.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ControlPlaneEndpoint;
use crate::domain::{BlocklistEntry, Payload, PipelineOutcome};

use super::{BlocklistSource, ControlPlane, PayloadSource};

/// Control-plane HTTP client
pub struct HttpControlPlane {
    endpoint: ControlPlaneEndpoint,
    client: reqwest::Client,
}

/// Response body of the blocklist endpoint
#[derive(Debug, Deserialize)]
struct BlocklistResponse {
    #[serde(default)]
    blocklist: Vec<BlocklistEntry>,
}

impl HttpControlPlane {
    pub fn new(endpoint: ControlPlaneEndpoint) -> Self {
        Self {
            endpoint,
            client: super::http_client(),
        }
    }

    pub fn endpoint(&self) -> &ControlPlaneEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn report(&self, outcome: &PipelineOutcome) -> Result<()> {
        let url = self.endpoint.url("/report");

        let response = self
            .client
            .post(&url)
            .json(outcome)
            .send()
            .await
            .context("Failed to send run report")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Control plane rejected report ({}): {}", status, body.trim());
        }

        Ok(())
    }
}

#[async_trait]
impl BlocklistSource for HttpControlPlane {
    async fn blocklist(&self, project_id: &str) -> Result<Vec<BlocklistEntry>> {
        let url = self.endpoint.url(&format!("/blocklist/{}", project_id));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch blocklist")?;

        if !response.status().is_success() {
            anyhow::bail!("Blocklist request failed with status {}", response.status());
        }

        let body: BlocklistResponse = response
            .json()
            .await
            .context("Failed to parse blocklist response")?;

        Ok(body.blocklist)
    }
}

#[async_trait]
impl PayloadSource for HttpControlPlane {
    async fn payload(&self, address: &str) -> Result<Payload> {
        let response = self
            .client
            .get(address)
            .send()
            .await
            .with_context(|| format!("Failed to fetch payload from {}", address))?;

        if !response.status().is_success() {
            anyhow::bail!("Payload request failed with status {}", response.status());
        }

        response.json().await.context("Failed to parse payload")
    }
}
