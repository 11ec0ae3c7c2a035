//! Supervisor facade owning the registry, monitor and dispatcher

use crate::dispatch::{DispatchOutcome, Dispatcher, HttpWorkerClient, WorkerClient};
use crate::monitor::{HealthMonitor, MonitorHandle, MonitorSettings};
use crate::probe::{HealthProber, HttpHealthProber};
use crate::process::{OsProcessLauncher, ProcessLauncher};
use crate::registry::{AgentRegistry, AgentStatus, AgentStatusReport, RegistrySettings};
use crate::router::FallbackRouter;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};
use warden_core::config::WardenConfig;
use warden_core::protocol::{NormalizedResponse, QueryRequest};

/// Overall system health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    /// Every agent is running
    Ok,
    /// Some agents are running
    Degraded,
    /// No agent is running
    Down,
}

/// Answer to a system-status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub status: OverallHealth,
    pub healthy_agents: usize,
    pub total_agents: usize,
    pub monitor_running: bool,
    pub agents: BTreeMap<String, AgentStatusReport>,
}

/// Builder for [`Supervisor`]
pub struct SupervisorBuilder {
    config: WardenConfig,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    prober: Option<Arc<dyn HealthProber>>,
    client: Option<Arc<dyn WorkerClient>>,
}

impl SupervisorBuilder {
    /// Create a builder for `config`
    pub fn new(config: WardenConfig) -> Self {
        Self {
            config,
            launcher: None,
            prober: None,
            client: None,
        }
    }

    /// Use a custom process launcher
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Use a custom health prober
    pub fn with_prober(mut self, prober: Arc<dyn HealthProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Use a custom worker client for dispatch
    pub fn with_worker_client(mut self, client: Arc<dyn WorkerClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Validate the configuration and build the supervisor.
    ///
    /// No process is started until [`Supervisor::start_all`] or
    /// [`Supervisor::start_agent`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SupervisorError::Configuration`] if the configuration
    /// is invalid.
    pub fn build(self) -> Result<Supervisor> {
        self.config.validate()?;
        let table = self.config.descriptor_table()?;
        let settings = &self.config.supervisor;

        let http = reqwest::Client::new();
        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(OsProcessLauncher::new(settings.worker_output)));
        let prober = self.prober.unwrap_or_else(|| {
            Arc::new(HttpHealthProber::with_client(
                http.clone(),
                settings.probe_timeout,
            ))
        });
        let client = self.client.unwrap_or_else(|| {
            Arc::new(HttpWorkerClient::with_client(http, settings.request_timeout))
        });

        let registry = Arc::new(AgentRegistry::new(
            table,
            launcher,
            prober,
            RegistrySettings::from(settings),
        ));
        let router = FallbackRouter::new(registry.clone(), settings.default_agent.clone());
        let dispatcher = Dispatcher::new(registry.clone(), router, client);

        Ok(Supervisor {
            config: self.config,
            registry,
            dispatcher,
            monitor: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }
}

/// Agent process supervisor and fault-tolerant router.
///
/// One instance owns every worker process it starts. Call
/// [`shutdown`](Self::shutdown) before dropping it; workers left running are
/// killed when their handles drop.
pub struct Supervisor {
    config: WardenConfig,
    registry: Arc<AgentRegistry>,
    dispatcher: Dispatcher,
    monitor: Mutex<Option<MonitorHandle>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("registry", &self.registry)
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Start building a supervisor
    pub fn builder(config: WardenConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(config)
    }

    /// Build a supervisor with the HTTP prober, HTTP client and OS launcher
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: WardenConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Configuration this supervisor was built from
    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// Underlying registry
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Start one agent
    ///
    /// # Errors
    ///
    /// Returns an error for undeclared agents.
    pub async fn start_agent(&self, name: &str) -> Result<bool> {
        self.registry.start_agent(name).await
    }

    /// Stop one agent
    ///
    /// # Errors
    ///
    /// Returns an error for undeclared agents.
    pub async fn stop_agent(&self, name: &str) -> Result<bool> {
        self.registry.stop_agent(name).await
    }

    /// Restart one agent within its restart budget
    ///
    /// # Errors
    ///
    /// Returns an error for undeclared agents or an exhausted budget.
    pub async fn restart_agent(&self, name: &str) -> Result<bool> {
        self.registry.restart_agent(name).await
    }

    /// Start every agent
    pub async fn start_all(&self) -> BTreeMap<String, bool> {
        self.registry.start_all().await
    }

    /// Stop every agent
    pub async fn stop_all(&self) -> BTreeMap<String, bool> {
        self.registry.stop_all().await
    }

    /// Running agents in declaration order
    pub async fn get_healthy_agents(&self) -> Vec<String> {
        self.registry.healthy_agents().await
    }

    /// Healthy members of the fallback chain of `name`
    ///
    /// # Errors
    ///
    /// Returns an error for undeclared agents.
    pub async fn get_fallback_agents(&self, name: &str) -> Result<Vec<String>> {
        self.dispatcher.router().fallback_agents(name).await
    }

    /// Route and forward a query
    pub async fn dispatch(&self, request: &QueryRequest, preferred: Option<&str>) -> NormalizedResponse {
        self.dispatcher.dispatch(request, preferred).await
    }

    /// Route and forward a query, keeping the record of every attempt
    pub async fn dispatch_traced(
        &self,
        request: &QueryRequest,
        preferred: Option<&str>,
    ) -> DispatchOutcome {
        self.dispatcher.dispatch_traced(request, preferred).await
    }

    /// Diagnostic report of every agent
    pub async fn get_status_snapshot(&self) -> BTreeMap<String, AgentStatusReport> {
        self.registry.status_snapshot().await
    }

    /// Overall health plus every agent's report
    pub async fn system_status(&self) -> SystemStatus {
        let agents = self.registry.status_snapshot().await;
        let total_agents = agents.len();
        let healthy_agents = agents
            .values()
            .filter(|report| report.status == AgentStatus::Running)
            .count();

        let status = if healthy_agents == total_agents {
            OverallHealth::Ok
        } else if healthy_agents == 0 {
            OverallHealth::Down
        } else {
            OverallHealth::Degraded
        };

        SystemStatus {
            status,
            healthy_agents,
            total_agents,
            monitor_running: self.monitor.lock().await.is_some(),
            agents,
        }
    }

    /// Start the health monitor. Returns `false` if it is already running.
    pub async fn start_monitor(&self) -> bool {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return false;
        }

        let settings = MonitorSettings {
            interval: self.config.supervisor.health_check_interval,
            parallel: self.config.supervisor.parallel_probes,
        };
        *monitor = Some(HealthMonitor::new(self.registry.clone(), settings).spawn());
        true
    }

    /// Stop the health monitor, waiting for its in-flight cycle
    pub async fn stop_monitor(&self) {
        let handle = self.monitor.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    /// Stop the monitor, then every worker. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down supervisor...");
        self.stop_monitor().await;

        let results = self.registry.stop_all().await;
        let failed: Vec<_> = results
            .iter()
            .filter(|(_, stopped)| !**stopped)
            .map(|(name, _)| name.as_str())
            .collect();
        if !failed.is_empty() {
            warn!("Agents not confirmed stopped: {:?}", failed);
        }
        info!("Supervisor shut down");
    }
}
