//! Fallback routing over healthy agents
//!
//! Candidates are always the requested agent followed by its declared
//! fallback chain, filtered to agents that are `Running` in one registry
//! snapshot. Order is never changed by load or recency.

use crate::registry::AgentRegistry;
use crate::{Result, SupervisorError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Resolves requested agents to healthy candidates
#[derive(Debug, Clone)]
pub struct FallbackRouter {
    registry: Arc<AgentRegistry>,
    default_agent: String,
}

impl FallbackRouter {
    /// Create a router; `default_agent` serves requests naming no agent
    pub fn new(registry: Arc<AgentRegistry>, default_agent: impl Into<String>) -> Self {
        Self {
            registry,
            default_agent: default_agent.into(),
        }
    }

    /// Agent used when a request names none
    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// The requested agent, or the default one
    pub fn requested_or_default<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested.unwrap_or(&self.default_agent)
    }

    /// Ordered healthy candidates for `requested`, possibly empty
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::UnknownAgent`] if `requested` is not declared.
    pub async fn candidates(&self, requested: &str) -> Result<Vec<String>> {
        let table = self.registry.table();
        if !table.contains(requested) {
            return Err(SupervisorError::UnknownAgent(requested.to_string()));
        }

        let healthy: HashSet<String> = self.registry.healthy_agents().await.into_iter().collect();
        let mut seen = HashSet::new();

        let candidates: Vec<String> = std::iter::once(requested)
            .chain(table.fallback_chain(requested).iter().map(String::as_str))
            .filter(|name| healthy.contains(*name))
            .filter(|name| seen.insert(*name))
            .map(str::to_string)
            .collect();

        debug!("Candidates for {}: {:?}", requested, candidates);
        Ok(candidates)
    }

    /// Like [`candidates`](Self::candidates) but fails when nothing is healthy
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::NoHealthyAgent`] for an empty candidate list
    /// and [`SupervisorError::UnknownAgent`] for undeclared names.
    pub async fn resolve_candidates(&self, requested: &str) -> Result<Vec<String>> {
        let candidates = self.candidates(requested).await?;
        if candidates.is_empty() {
            return Err(SupervisorError::NoHealthyAgent(requested.to_string()));
        }
        Ok(candidates)
    }

    /// First healthy candidate for `preferred`, or for the default agent
    ///
    /// # Errors
    ///
    /// Same as [`resolve_candidates`](Self::resolve_candidates).
    pub async fn route(&self, preferred: Option<&str>) -> Result<String> {
        let requested = self.requested_or_default(preferred);
        let mut candidates = self.resolve_candidates(requested).await?;
        Ok(candidates.swap_remove(0))
    }

    /// Healthy members of the declared fallback chain of `name`
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::UnknownAgent`] if `name` is not declared.
    pub async fn fallback_agents(&self, name: &str) -> Result<Vec<String>> {
        let table = self.registry.table();
        if !table.contains(name) {
            return Err(SupervisorError::UnknownAgent(name.to_string()));
        }

        let healthy: HashSet<String> = self.registry.healthy_agents().await.into_iter().collect();
        Ok(table
            .fallback_chain(name)
            .iter()
            .filter(|agent| healthy.contains(*agent))
            .cloned()
            .collect())
    }
}
