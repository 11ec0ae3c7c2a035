//! Error types for supervisor operations

use std::time::Duration;
use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Error types for the supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Failed to spawn agent {agent}: {reason}")]
    Spawn { agent: String, reason: String },

    #[error("Health check failed for agent {agent}: {reason}")]
    HealthCheck { agent: String, reason: String },

    #[error("Agent {agent} has exceeded max restart attempts ({max_restarts})")]
    RestartLimitExceeded { agent: String, max_restarts: u32 },

    #[error("No healthy agent available for {0}")]
    NoHealthyAgent(String),

    #[error("All agents failed for {requested} (tried {attempted:?}): {last_error}")]
    AllAgentsFailed {
        requested: String,
        attempted: Vec<String>,
        #[source]
        last_error: TransportError,
    },

    #[error(transparent)]
    Configuration(#[from] warden_core::error::WardenError),
}

/// Network failure talking to a running worker
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Request to agent {agent} timed out after {timeout:?}")]
    Timeout { agent: String, timeout: Duration },

    #[error("Could not reach agent {agent}: {reason}")]
    Connect { agent: String, reason: String },

    #[error("Agent {agent} answered with HTTP {status}")]
    Status { agent: String, status: u16 },

    #[error("Agent {agent} sent an unreadable reply: {reason}")]
    Decode { agent: String, reason: String },
}

impl TransportError {
    /// Agent the failed request was addressed to
    pub fn agent(&self) -> &str {
        match self {
            TransportError::Timeout { agent, .. }
            | TransportError::Connect { agent, .. }
            | TransportError::Status { agent, .. }
            | TransportError::Decode { agent, .. } => agent,
        }
    }

    /// Classify a reqwest failure
    pub(crate) fn from_reqwest(agent: &str, timeout: Duration, err: reqwest::Error) -> Self {
        let agent = agent.to_string();
        if err.is_timeout() {
            TransportError::Timeout { agent, timeout }
        } else if let Some(status) = err.status() {
            TransportError::Status {
                agent,
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            TransportError::Decode {
                agent,
                reason: err.to_string(),
            }
        } else {
            TransportError::Connect {
                agent,
                reason: err.to_string(),
            }
        }
    }
}
