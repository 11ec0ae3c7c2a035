//! Periodic health monitoring
//!
//! The monitor wakes every interval, takes one registry snapshot of agents
//! that are `Running` or `Crashed`, and runs one supervise step per agent.
//! Each step runs in its own task so a panic while checking one agent is
//! logged and does not take the loop down.

use crate::registry::{AgentRegistry, CheckOutcome};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Monitor loop settings
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Time between the end of one cycle and the start of the next
    pub interval: Duration,
    /// Check agents concurrently instead of one after another
    pub parallel: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            parallel: true,
        }
    }
}

/// Outcomes of one monitor cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub outcomes: BTreeMap<String, CheckOutcome>,
}

impl CycleReport {
    /// Agents that ended the cycle answering their probe
    pub fn healthy_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| {
                matches!(
                    o,
                    CheckOutcome::Healthy | CheckOutcome::Recovered | CheckOutcome::Restarted
                )
            })
            .count()
    }

    /// Agents restarted during the cycle
    pub fn restarted(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| **o == CheckOutcome::Restarted)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Health monitor loop over a registry
pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    settings: MonitorSettings,
}

impl HealthMonitor {
    /// Create a monitor
    pub fn new(registry: Arc<AgentRegistry>, settings: MonitorSettings) -> Self {
        Self { registry, settings }
    }

    /// Run one full cycle now
    pub async fn run_cycle(&self) -> CycleReport {
        self.cycle(&CancellationToken::new()).await
    }

    /// Start the loop on the runtime
    pub fn spawn(self) -> MonitorHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));
        MonitorHandle { token, task }
    }

    async fn run(self, token: CancellationToken) {
        info!(
            "Health monitor started (interval {:?}, {})",
            self.settings.interval,
            if self.settings.parallel { "parallel" } else { "sequential" }
        );

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }

            // A started cycle always completes (sequential mode stops between agents)
            let report = self.cycle(&token).await;
            debug!(
                "Health check cycle: {}/{} agents healthy in {:?}",
                report.healthy_count(),
                report.outcomes.len(),
                report.elapsed
            );
        }

        info!("Health monitor stopped");
    }

    async fn cycle(&self, token: &CancellationToken) -> CycleReport {
        let started_at = Utc::now();
        let started = Instant::now();
        let agents = self.registry.monitored_agents().await;

        let outcomes = if self.settings.parallel {
            join_all(
                agents
                    .iter()
                    .map(|name| async move { (name.clone(), self.supervise(name).await) }),
            )
            .await
        } else {
            let mut outcomes = Vec::with_capacity(agents.len());
            for name in agents {
                if token.is_cancelled() {
                    debug!("Health check cycle cancelled before agent {}", name);
                    break;
                }
                let outcome = self.supervise(&name).await;
                outcomes.push((name, outcome));
            }
            outcomes
        };

        CycleReport {
            started_at,
            elapsed: started.elapsed(),
            outcomes: outcomes
                .into_iter()
                .filter_map(|(name, outcome)| outcome.map(|o| (name, o)))
                .collect(),
        }
    }

    async fn supervise(&self, name: &str) -> Option<CheckOutcome> {
        let registry = self.registry.clone();
        let agent = name.to_string();

        match tokio::spawn(async move { registry.supervise_agent(&agent).await }).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                error!("Health check for agent {} failed: {}", name, e);
                None
            }
            Err(e) => {
                error!("Health check task for agent {} panicked: {}", name, e);
                None
            }
        }
    }
}

/// Handle to a running monitor loop
#[derive(Debug)]
pub struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Cancel the loop and wait for the in-flight cycle to finish
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            error!("Health monitor task ended abnormally: {}", e);
        }
    }

    /// Whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
