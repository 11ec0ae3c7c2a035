//! Worker wire protocol
//!
//! Bodies exchanged with worker processes over HTTP, and the fixed response
//! envelope every dispatch is normalized into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Worker health endpoint
pub const HEALTH_PATH: &str = "/health";

/// Worker query endpoint
pub const QUERY_PATH: &str = "/query";

/// Worker status endpoint
pub const STATUS_PATH: &str = "/status";

/// Agent name used in envelopes produced by the supervisor itself
pub const SYSTEM_AGENT: &str = "system";

/// Body of `POST /query`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Natural-language query
    pub query: String,

    /// Optional context for the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, serde_json::Value>>,

    /// Optional agent parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<HashMap<String, serde_json::Value>>,
}

impl QueryRequest {
    /// Create a request with only a query
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context: None,
            parameters: None,
        }
    }

    /// Builder: add a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Builder: add a parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

/// Reply body of `POST /query`, as sent by a worker.
///
/// Every field is optional on the wire so that replies from older or partial
/// workers still decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    #[serde(default)]
    pub answer: String,

    #[serde(default)]
    pub reasoning: String,

    /// Name the worker reports for itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default)]
    pub blocks: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The fixed envelope every dispatch result is mapped into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub answer: String,
    pub reasoning: String,
    /// Agent that produced the answer, or `system` for supervisor failures
    pub agent_name: String,
    pub status: String,
    pub blocks: serde_json::Map<String, serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
}

impl NormalizedResponse {
    /// Normalize a worker reply served by `agent_name`
    pub fn from_reply(agent_name: &str, reply: WorkerReply) -> Self {
        let success = reply.success.unwrap_or(reply.error.is_none());
        let status = reply.status.unwrap_or_else(|| {
            if success { "completed" } else { "error" }.to_string()
        });

        Self {
            answer: reply.answer,
            reasoning: reply.reasoning,
            agent_name: agent_name.to_string(),
            status,
            blocks: reply.blocks,
            success,
            error: reply.error,
        }
    }

    /// Envelope for a request the supervisor could not serve
    pub fn failure(error: impl std::fmt::Display) -> Self {
        let error = error.to_string();
        Self {
            answer: format!("I apologize, but I could not process your request: {}", error),
            reasoning: "No agent was able to answer this request.".to_string(),
            agent_name: SYSTEM_AGENT.to_string(),
            status: "error".to_string(),
            blocks: serde_json::Map::new(),
            success: false,
            error: Some(error),
        }
    }
}

/// Body of `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub agent: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Healthy report for `agent`, stamped now
    pub fn healthy(agent: impl Into<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            agent: agent.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Body of `GET /status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub agent_name: String,
    pub status: String,
    pub capabilities: Vec<String>,
    pub description: String,
    pub version: String,
}
