//! Application-level health probing

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use warden_core::descriptor::AgentDescriptor;
use warden_core::protocol::HEALTH_PATH;

/// Health of an agent as seen by one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Agent answered its health endpoint with a success status
    Healthy,
    /// Agent is unreachable, timed out, or answered with an error status
    Unhealthy(String),
}

impl HealthStatus {
    /// Whether the probe succeeded
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Liveness check against a running worker.
///
/// Implementations perform exactly one bounded attempt; retry policy belongs
/// to the health monitor.
#[async_trait]
pub trait HealthProber: Send + Sync {
    /// Probe one agent
    async fn probe(&self, descriptor: &AgentDescriptor) -> HealthStatus;
}

/// Prober issuing `GET /health` over HTTP
#[derive(Debug, Clone)]
pub struct HttpHealthProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpHealthProber {
    /// Create a prober with the given per-probe timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Create a prober sharing an existing client
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl HealthProber for HttpHealthProber {
    async fn probe(&self, descriptor: &AgentDescriptor) -> HealthStatus {
        let url = descriptor.endpoint(HEALTH_PATH);

        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Agent {} is healthy", descriptor.name);
                HealthStatus::Healthy
            }
            Ok(response) => HealthStatus::Unhealthy(format!("HTTP {}", response.status().as_u16())),
            Err(e) if e.is_timeout() => {
                HealthStatus::Unhealthy(format!("timed out after {:?}", self.timeout))
            }
            Err(e) => HealthStatus::Unhealthy(format!("connection failed: {}", e)),
        }
    }
}
