//! HTTP routes served by the reference worker

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use warden_core::descriptor::AgentKind;
use warden_core::protocol::{
    HEALTH_PATH, HealthReport, QUERY_PATH, QueryRequest, STATUS_PATH, WorkerReply, WorkerStatus,
};

/// Identity of the agent this worker serves
#[derive(Debug)]
pub struct WorkerState {
    pub agent: String,
    pub kind: AgentKind,
}

impl WorkerState {
    pub fn new(agent: impl Into<String>, kind: AgentKind) -> Self {
        Self {
            agent: agent.into(),
            kind,
        }
    }
}

pub fn router(state: Arc<WorkerState>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .route(STATUS_PATH, get(status_handler))
        .route(QUERY_PATH, post(query_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<WorkerState>>) -> Json<HealthReport> {
    Json(HealthReport::healthy(state.agent.clone()))
}

async fn status_handler(State(state): State<Arc<WorkerState>>) -> Json<WorkerStatus> {
    Json(WorkerStatus {
        agent_name: state.agent.clone(),
        status: "active".to_string(),
        capabilities: state
            .kind
            .capabilities()
            .iter()
            .map(|c| c.to_string())
            .collect(),
        description: state.kind.description().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn query_handler(
    State(state): State<Arc<WorkerState>>,
    Json(request): Json<QueryRequest>,
) -> Json<WorkerReply> {
    let query = request.query.trim();

    if query.is_empty() {
        debug!("Rejecting empty query");
        return Json(WorkerReply {
            answer: String::new(),
            reasoning: "The request did not contain a query.".to_string(),
            agent_name: Some(state.agent.clone()),
            status: Some("error".to_string()),
            success: Some(false),
            error: Some("query must not be empty".to_string()),
            ..Default::default()
        });
    }

    info!("Agent {} handling query ({} chars)", state.agent, query.len());

    let mut blocks = serde_json::Map::new();
    blocks.insert(
        "0".to_string(),
        json!({
            "tool": "echo",
            "kind": state.kind,
            "parameters": request.parameters,
        }),
    );

    Json(WorkerReply {
        answer: format!("[{}] {}. You asked: {}", state.agent, state.kind.description(), query),
        reasoning: format!("Handled by the {} worker", state.kind),
        agent_name: Some(state.agent.clone()),
        status: Some("completed".to_string()),
        blocks,
        success: Some(true),
        error: None,
    })
}
