//! Query dispatch with fallback across healthy agents
//!
//! A dispatch resolves its candidate list once and walks it in order. A
//! transport failure moves on to the next candidate and schedules an
//! out-of-band recheck of the agent that failed; a reply the worker actually
//! sent, successful or not, ends the walk.

use crate::error::TransportError;
use crate::registry::AgentRegistry;
use crate::router::FallbackRouter;
use crate::SupervisorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_core::descriptor::AgentDescriptor;
use warden_core::protocol::{NormalizedResponse, QueryRequest, QUERY_PATH, WorkerReply};

/// Forwards one query to one running worker
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Send `request` to the worker behind `descriptor`
    async fn query(
        &self,
        descriptor: &AgentDescriptor,
        request: &QueryRequest,
    ) -> std::result::Result<WorkerReply, TransportError>;
}

/// Worker client issuing `POST /query` over HTTP
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpWorkerClient {
    /// Create a client with the given per-request timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Create a client sharing an existing reqwest client
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn query(
        &self,
        descriptor: &AgentDescriptor,
        request: &QueryRequest,
    ) -> std::result::Result<WorkerReply, TransportError> {
        let agent = descriptor.name.as_str();

        let response = self
            .client
            .post(descriptor.endpoint(QUERY_PATH))
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(agent, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                agent: agent.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<WorkerReply>()
            .await
            .map_err(|e| TransportError::from_reqwest(agent, self.timeout, e))
    }
}

/// One failed attempt within a dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchAttempt {
    pub agent: String,
    pub error: String,
}

/// Full record of a dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub request_id: Uuid,
    /// Preferred agent, or the default agent if none was named
    pub requested_agent: String,
    /// Healthy candidates resolved when the dispatch began
    pub candidates: Vec<String>,
    /// Candidates that failed at the transport level, in order
    pub attempts: Vec<DispatchAttempt>,
    /// Agent whose reply is in `response`
    pub served_by: Option<String>,
    pub response: NormalizedResponse,
}

impl DispatchOutcome {
    /// Whether some worker answered
    pub fn is_served(&self) -> bool {
        self.served_by.is_some()
    }
}

/// Dispatch facade over the router and a worker client
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    router: FallbackRouter,
    client: Arc<dyn WorkerClient>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        registry: Arc<AgentRegistry>,
        router: FallbackRouter,
        client: Arc<dyn WorkerClient>,
    ) -> Self {
        Self {
            registry,
            router,
            client,
        }
    }

    /// Router used to resolve candidates
    pub fn router(&self) -> &FallbackRouter {
        &self.router
    }

    /// Dispatch a query and return only the normalized response
    pub async fn dispatch(&self, request: &QueryRequest, preferred: Option<&str>) -> NormalizedResponse {
        self.dispatch_traced(request, preferred).await.response
    }

    /// Dispatch a query, recording every candidate and attempt.
    ///
    /// Never fails: routing and transport failures end up in
    /// `response` as a failure envelope.
    pub async fn dispatch_traced(
        &self,
        request: &QueryRequest,
        preferred: Option<&str>,
    ) -> DispatchOutcome {
        let request_id = Uuid::new_v4();
        let requested = self.router.requested_or_default(preferred).to_string();

        let candidates = match self.router.resolve_candidates(&requested).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Dispatch {} for {} not routed: {}", request_id, requested, e);
                return DispatchOutcome {
                    request_id,
                    requested_agent: requested,
                    candidates: Vec::new(),
                    attempts: Vec::new(),
                    served_by: None,
                    response: NormalizedResponse::failure(e),
                };
            }
        };

        debug!(
            "Dispatch {} for {}: candidates {:?}",
            request_id, requested, candidates
        );

        let mut attempts = Vec::new();
        let mut last_error = None;

        // Candidates come from the registry's own table
        for descriptor in candidates.iter().filter_map(|name| self.registry.descriptor(name)) {
            let name = &descriptor.name;

            match self.client.query(descriptor, request).await {
                Ok(reply) => {
                    if name != &requested {
                        info!(
                            "Dispatch {}: {} unavailable, served by fallback {}",
                            request_id, requested, name
                        );
                    }
                    return DispatchOutcome {
                        request_id,
                        requested_agent: requested,
                        candidates: candidates.clone(),
                        attempts,
                        served_by: Some(name.clone()),
                        response: NormalizedResponse::from_reply(name, reply),
                    };
                }
                Err(e) => {
                    warn!("Dispatch {}: {}", request_id, e);
                    attempts.push(DispatchAttempt {
                        agent: name.clone(),
                        error: e.to_string(),
                    });
                    self.schedule_recheck(name);
                    last_error = Some(e);
                }
            }
        }

        let err = match last_error {
            Some(last_error) => SupervisorError::AllAgentsFailed {
                requested: requested.clone(),
                attempted: attempts.iter().map(|a| a.agent.clone()).collect(),
                last_error,
            },
            None => SupervisorError::NoHealthyAgent(requested.clone()),
        };
        warn!("Dispatch {} failed: {}", request_id, err);

        DispatchOutcome {
            request_id,
            requested_agent: requested,
            candidates,
            attempts,
            served_by: None,
            response: NormalizedResponse::failure(err),
        }
    }

    fn schedule_recheck(&self, name: &str) {
        let registry = self.registry.clone();
        let name = name.to_string();

        tokio::spawn(async move {
            match registry.recheck_agent(&name).await {
                Ok(outcome) => debug!("Recheck of agent {} after dispatch failure: {:?}", name, outcome),
                Err(e) => warn!("Recheck of agent {} failed: {}", name, e),
            }
        });
    }
}
