//! Agent registry and lifecycle state machine
//!
//! The registry owns one runtime state and one process slot per declared
//! agent. Every transition for an agent happens while holding that agent's
//! process lock, so a manual restart and a monitor-triggered restart of the
//! same agent serialize while different agents proceed independently.
//! Published state sits behind a separate synchronous lock so routing and
//! snapshots never wait on a lifecycle operation in flight.

use crate::process::{ProcessHandle, ProcessLauncher};
use crate::probe::{HealthProber, HealthStatus};
use crate::{Result, SupervisorError};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use warden_core::config::SupervisorSettings;
use warden_core::descriptor::{AgentDescriptor, AgentKind, DescriptorTable};

/// Lifecycle status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Stopped,
    Starting,
    Running,
    Crashed,
    Restarting,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Stopped => write!(f, "stopped"),
            AgentStatus::Starting => write!(f, "starting"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Crashed => write!(f, "crashed"),
            AgentStatus::Restarting => write!(f, "restarting"),
        }
    }
}

/// Read-only diagnostic view of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusReport {
    pub status: AgentStatus,
    pub kind: AgentKind,
    pub port: u16,
    pub restart_count: u32,
    pub max_restarts: u32,
    /// Most recent successful health probe
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    /// Most recent spawn or health check failure
    pub last_error: Option<String>,
}

/// Result of one health check step for one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Running and still healthy
    Healthy,
    /// Was crashed, answered its probe again
    Recovered,
    /// Was running, failed its probe
    Crashed(String),
    /// Crashed, still failing, no restart attempted
    StillCrashed(String),
    /// Crashed, restarted, healthy again
    Restarted,
    /// Crashed, restart attempted and failed
    RestartFailed,
    /// Crashed with its restart budget exhausted
    RestartLimitReached,
    /// Not in a monitored state
    Skipped(AgentStatus),
}

/// Timing used by lifecycle transitions
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Wait between spawn and the single startup probe
    pub startup_grace: Duration,
    /// SIGTERM to SIGKILL escalation window
    pub shutdown_timeout: Duration,
    /// Pause between stop and start inside a restart
    pub restart_pause: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self::from(&SupervisorSettings::default())
    }
}

impl From<&SupervisorSettings> for RegistrySettings {
    fn from(settings: &SupervisorSettings) -> Self {
        Self {
            startup_grace: settings.startup_grace,
            shutdown_timeout: settings.shutdown_timeout,
            restart_pause: settings.restart_pause,
        }
    }
}

/// `last_error` of an agent whose start or restart never completed
const INTERRUPTED_TRANSITION: &str = "lifecycle transition was interrupted";

#[derive(Debug, Clone)]
struct RuntimeState {
    status: AgentStatus,
    restart_count: u32,
    last_health_check_at: Option<DateTime<Utc>>,
    pid: Option<u32>,
    last_error: Option<String>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            status: AgentStatus::Stopped,
            restart_count: 0,
            last_health_check_at: None,
            pid: None,
            last_error: None,
        }
    }
}

struct AgentSlot {
    descriptor: AgentDescriptor,
    /// Process table entry; holding this lock serializes transitions
    process: Mutex<Option<ProcessHandle>>,
    /// Published state, written only while `process` is held
    state: RwLock<RuntimeState>,
}

impl AgentSlot {
    fn new(descriptor: AgentDescriptor) -> Self {
        Self {
            descriptor,
            process: Mutex::new(None),
            state: RwLock::new(RuntimeState::default()),
        }
    }

    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn update(&self, f: impl FnOnce(&mut RuntimeState)) {
        f(&mut self.state.write());
    }

    fn status(&self) -> AgentStatus {
        self.state.read().status
    }

    fn report(&self) -> AgentStatusReport {
        let state = self.state.read();
        AgentStatusReport {
            status: state.status,
            kind: self.descriptor.kind,
            port: self.descriptor.port,
            restart_count: state.restart_count,
            max_restarts: self.descriptor.max_restarts,
            last_health_check_at: state.last_health_check_at,
            pid: state.pid,
            last_error: state.last_error.clone(),
        }
    }
}

/// Settles an agent left `Starting` or `Restarting` as `Crashed` when its
/// transition is abandoned by a panic or a dropped future
struct TransitionGuard<'a>(&'a AgentSlot);

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.write();
        if matches!(state.status, AgentStatus::Starting | AgentStatus::Restarting) {
            error!("Agent {} lifecycle transition was interrupted", self.0.name());
            state.status = AgentStatus::Crashed;
            state.pid = None;
            state.last_error = Some(INTERRUPTED_TRANSITION.to_string());
        }
    }
}

/// Registry of agents and driver of their lifecycle transitions
pub struct AgentRegistry {
    table: DescriptorTable,
    slots: HashMap<String, AgentSlot>,
    launcher: Arc<dyn ProcessLauncher>,
    prober: Arc<dyn HealthProber>,
    settings: RegistrySettings,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.table.names().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish()
    }
}

impl AgentRegistry {
    /// Create a registry with every agent `Stopped`
    pub fn new(
        table: DescriptorTable,
        launcher: Arc<dyn ProcessLauncher>,
        prober: Arc<dyn HealthProber>,
        settings: RegistrySettings,
    ) -> Self {
        let slots = table
            .iter()
            .map(|descriptor| (descriptor.name.clone(), AgentSlot::new(descriptor.clone())))
            .collect();

        Self {
            table,
            slots,
            launcher,
            prober,
            settings,
        }
    }

    /// The descriptor table this registry was built from
    pub fn table(&self) -> &DescriptorTable {
        &self.table
    }

    /// Look up a descriptor by name
    pub fn descriptor(&self, name: &str) -> Option<&AgentDescriptor> {
        self.slots.get(name).map(|slot| &slot.descriptor)
    }

    fn slot(&self, name: &str) -> Result<&AgentSlot> {
        self.slots
            .get(name)
            .ok_or_else(|| SupervisorError::UnknownAgent(name.to_string()))
    }

    /// Start an agent: spawn, wait the grace period, probe once.
    ///
    /// Returns `Ok(false)` when the spawn or the startup probe fails; the
    /// agent is then `Crashed` and the cause is in its status report.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::UnknownAgent`] for undeclared names.
    pub async fn start_agent(&self, name: &str) -> Result<bool> {
        let slot = self.slot(name)?;
        let mut process = slot.process.lock().await;
        Ok(self.start_locked(slot, &mut process, AgentStatus::Starting).await)
    }

    /// Stop an agent. Stopping a stopped agent succeeds without side effects.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::UnknownAgent`] for undeclared names.
    pub async fn stop_agent(&self, name: &str) -> Result<bool> {
        let slot = self.slot(name)?;
        let mut process = slot.process.lock().await;
        Ok(self.stop_locked(slot, &mut process).await)
    }

    /// Stop then start an agent, consuming one unit of its restart budget.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::RestartLimitExceeded`] once the budget is
    /// spent (the agent is left as it was), or
    /// [`SupervisorError::UnknownAgent`] for undeclared names.
    pub async fn restart_agent(&self, name: &str) -> Result<bool> {
        let slot = self.slot(name)?;
        let mut process = slot.process.lock().await;
        self.restart_locked(slot, &mut process).await
    }

    /// Probe an agent and apply the resulting transition without restarting.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::UnknownAgent`] for undeclared names.
    pub async fn recheck_agent(&self, name: &str) -> Result<CheckOutcome> {
        let slot = self.slot(name)?;
        let mut process = slot.process.lock().await;
        Ok(self.check_locked(slot, &mut process, false).await)
    }

    /// One health monitor step for one agent, restarting it if it stays down.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::UnknownAgent`] for undeclared names.
    pub async fn supervise_agent(&self, name: &str) -> Result<CheckOutcome> {
        let slot = self.slot(name)?;
        let mut process = slot.process.lock().await;
        Ok(self.check_locked(slot, &mut process, true).await)
    }

    /// Start every agent concurrently
    pub async fn start_all(&self) -> BTreeMap<String, bool> {
        info!("Starting all agent workers...");

        let results: BTreeMap<String, bool> = join_all(self.table.names().map(|name| async move {
            let started = self.start_agent(name).await.unwrap_or(false);
            (name.to_string(), started)
        }))
        .await
        .into_iter()
        .collect();

        let healthy = results.values().filter(|ok| **ok).count();
        info!(
            "Agent startup complete: {}/{} agents healthy",
            healthy,
            results.len()
        );
        results
    }

    /// Stop every agent concurrently
    pub async fn stop_all(&self) -> BTreeMap<String, bool> {
        info!("Stopping all agent workers...");

        let results = join_all(self.table.names().map(|name| async move {
            let stopped = self.stop_agent(name).await.unwrap_or(false);
            (name.to_string(), stopped)
        }))
        .await
        .into_iter()
        .collect();

        info!("All agents stopped");
        results
    }

    /// Current status of one agent
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::UnknownAgent`] for undeclared names.
    pub async fn status(&self, name: &str) -> Result<AgentStatus> {
        Ok(self.slot(name)?.status())
    }

    /// Diagnostic report for one agent
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::UnknownAgent`] for undeclared names.
    pub async fn report(&self, name: &str) -> Result<AgentStatusReport> {
        Ok(self.slot(name)?.report())
    }

    /// Agents currently `Running`, in declaration order
    pub async fn healthy_agents(&self) -> Vec<String> {
        self.agents_in(&[AgentStatus::Running]).await
    }

    /// Agents the health monitor should look at (`Running` or `Crashed`)
    pub async fn monitored_agents(&self) -> Vec<String> {
        self.agents_in(&[AgentStatus::Running, AgentStatus::Crashed])
            .await
    }

    async fn agents_in(&self, statuses: &[AgentStatus]) -> Vec<String> {
        self.table
            .names()
            .filter(|name| {
                self.slots
                    .get(*name)
                    .is_some_and(|slot| statuses.contains(&slot.status()))
            })
            .map(str::to_string)
            .collect()
    }

    /// Read-only diagnostic view of every agent
    pub async fn status_snapshot(&self) -> BTreeMap<String, AgentStatusReport> {
        self.slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.report()))
            .collect()
    }

    async fn start_locked(
        &self,
        slot: &AgentSlot,
        process: &mut Option<ProcessHandle>,
        phase: AgentStatus,
    ) -> bool {
        let descriptor = &slot.descriptor;
        let name = slot.name();
        let _guard = TransitionGuard(slot);

        info!("Starting agent {} on port {}", name, descriptor.port);
        slot.update(|state| state.status = phase);

        if !self.release_process(slot, process).await {
            return false;
        }

        let mut handle = match self.launcher.spawn(descriptor).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Agent {} failed to start: {}", name, e);
                slot.update(|state| {
                    state.status = AgentStatus::Crashed;
                    state.last_error = Some(e.to_string());
                });
                return false;
            }
        };

        let pid = handle.pid();
        slot.update(|state| state.pid = Some(pid));

        tokio::time::sleep(self.settings.startup_grace).await;

        if !self.launcher.is_alive(&mut handle) {
            error!("Agent {} process exited during startup", name);
            // Reap it; the exit is already confirmed
            self.launcher
                .stop_gracefully(handle, self.settings.shutdown_timeout)
                .await;
            slot.update(|state| {
                state.status = AgentStatus::Crashed;
                state.pid = None;
                state.last_error = Some("process exited during startup".to_string());
            });
            return false;
        }

        match self.prober.probe(descriptor).await {
            HealthStatus::Healthy => {
                *process = Some(handle);
                slot.update(|state| {
                    state.status = AgentStatus::Running;
                    state.last_health_check_at = Some(Utc::now());
                    state.last_error = None;
                });
                info!(
                    "Agent {} started successfully on port {} (PID {})",
                    name, descriptor.port, pid
                );
                true
            }
            HealthStatus::Unhealthy(reason) => {
                let err = SupervisorError::HealthCheck {
                    agent: name.to_string(),
                    reason,
                };
                error!("Agent {} started but its health check failed: {}", name, err);
                let stopped = self
                    .launcher
                    .stop_gracefully(handle, self.settings.shutdown_timeout)
                    .await;
                slot.update(|state| {
                    state.status = AgentStatus::Crashed;
                    state.pid = None;
                    state.last_error = Some(if stopped {
                        err.to_string()
                    } else {
                        format!("{}; process {} exit could not be confirmed", err, pid)
                    });
                });
                false
            }
        }
    }

    /// Stop the process still held for `slot`, if any.
    ///
    /// Returns `false` and leaves the agent `Crashed` when the old process
    /// cannot be confirmed dead, so no second worker is bound to its port.
    async fn release_process(&self, slot: &AgentSlot, process: &mut Option<ProcessHandle>) -> bool {
        let Some(existing) = process.take() else {
            return true;
        };

        let pid = existing.pid();
        info!("Stopping existing {} agent process (PID {})", slot.name(), pid);
        if self
            .launcher
            .stop_gracefully(existing, self.settings.shutdown_timeout)
            .await
        {
            slot.update(|state| state.pid = None);
            return true;
        }

        error!(
            "Agent {} previous process (PID {}) did not exit, not launching another",
            slot.name(),
            pid
        );
        slot.update(|state| {
            state.status = AgentStatus::Crashed;
            state.pid = None;
            state.last_error = Some(format!("previous process {} exit could not be confirmed", pid));
        });
        false
    }

    async fn stop_locked(&self, slot: &AgentSlot, process: &mut Option<ProcessHandle>) -> bool {
        let name = slot.name();

        let Some(handle) = process.take() else {
            let mut state = slot.state.write();
            if state.status != AgentStatus::Stopped {
                info!("Agent {} was not running", name);
                state.status = AgentStatus::Stopped;
                state.pid = None;
            }
            return true;
        };

        let stopped = self
            .launcher
            .stop_gracefully(handle, self.settings.shutdown_timeout)
            .await;

        slot.update(|state| {
            state.status = AgentStatus::Stopped;
            state.pid = None;
            if !stopped {
                state.last_error = Some("process exit could not be confirmed".to_string());
            }
        });

        if stopped {
            info!("Agent {} stopped", name);
        } else {
            error!("Agent {} may still be running after stop", name);
        }
        stopped
    }

    async fn restart_locked(
        &self,
        slot: &AgentSlot,
        process: &mut Option<ProcessHandle>,
    ) -> Result<bool> {
        let name = slot.name();
        let max_restarts = slot.descriptor.max_restarts;
        let restart_count = slot.state.read().restart_count;

        if restart_count >= max_restarts {
            error!(
                "Agent {} has exceeded max restart attempts ({})",
                name, max_restarts
            );
            return Err(SupervisorError::RestartLimitExceeded {
                agent: name.to_string(),
                max_restarts,
            });
        }

        let attempt = restart_count + 1;
        info!(
            "Restarting agent {} (attempt {}/{})",
            name, attempt, max_restarts
        );
        let _guard = TransitionGuard(slot);
        slot.update(|state| {
            state.status = AgentStatus::Restarting;
            state.restart_count = attempt;
        });

        if !self.release_process(slot, process).await {
            warn!("Failed to restart agent {}", name);
            return Ok(false);
        }

        tokio::time::sleep(self.settings.restart_pause).await;

        let restarted = self
            .start_locked(slot, process, AgentStatus::Restarting)
            .await;
        if restarted {
            info!("Agent {} restarted successfully", name);
        } else {
            warn!("Failed to restart agent {}", name);
        }
        Ok(restarted)
    }

    async fn check_locked(
        &self,
        slot: &AgentSlot,
        process: &mut Option<ProcessHandle>,
        restart_on_crash: bool,
    ) -> CheckOutcome {
        let name = slot.name();
        let status = slot.status();

        if !matches!(status, AgentStatus::Running | AgentStatus::Crashed) {
            debug!("Skipping health check for agent {} ({})", name, status);
            return CheckOutcome::Skipped(status);
        }

        let health = self.prober.probe(&slot.descriptor).await;

        match (status, health) {
            (AgentStatus::Running, HealthStatus::Healthy) => {
                slot.update(|state| state.last_health_check_at = Some(Utc::now()));
                CheckOutcome::Healthy
            }
            (AgentStatus::Running, HealthStatus::Unhealthy(reason)) => {
                warn!("Agent {} failed its health check: {}", name, reason);
                let err = SupervisorError::HealthCheck {
                    agent: name.to_string(),
                    reason: reason.clone(),
                };
                slot.update(|state| {
                    state.status = AgentStatus::Crashed;
                    state.last_error = Some(err.to_string());
                });
                CheckOutcome::Crashed(reason)
            }
            (_, HealthStatus::Healthy) => {
                info!("Agent {} is answering again, marking it running", name);
                slot.update(|state| {
                    state.status = AgentStatus::Running;
                    state.last_health_check_at = Some(Utc::now());
                    state.last_error = None;
                });
                CheckOutcome::Recovered
            }
            (_, HealthStatus::Unhealthy(reason)) => {
                if !restart_on_crash {
                    return CheckOutcome::StillCrashed(reason);
                }

                warn!("Agent {} is down, attempting restart...", name);
                match self.restart_locked(slot, process).await {
                    Ok(true) => CheckOutcome::Restarted,
                    Ok(false) => CheckOutcome::RestartFailed,
                    Err(SupervisorError::RestartLimitExceeded { .. }) => {
                        CheckOutcome::RestartLimitReached
                    }
                    Err(e) => {
                        error!("Error restarting agent {}: {}", name, e);
                        CheckOutcome::RestartFailed
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockLauncher, ScriptedProber, fast_settings, scenario_table};

    fn registry_with(
        launcher: &Arc<MockLauncher>,
        prober: &Arc<ScriptedProber>,
    ) -> AgentRegistry {
        AgentRegistry::new(
            scenario_table(3),
            launcher.clone(),
            prober.clone(),
            fast_settings(),
        )
    }

    fn setup() -> (AgentRegistry, Arc<MockLauncher>, Arc<ScriptedProber>) {
        let launcher = Arc::new(MockLauncher::new());
        let prober = Arc::new(ScriptedProber::new());
        (registry_with(&launcher, &prober), launcher, prober)
    }

    #[tokio::test]
    async fn test_all_agents_start_stopped() {
        let (registry, _, _) = setup();
        let snapshot = registry.status_snapshot().await;

        assert_eq!(snapshot.len(), 4);
        for report in snapshot.values() {
            assert_eq!(report.status, AgentStatus::Stopped);
            assert_eq!(report.restart_count, 0);
            assert!(report.pid.is_none());
            assert!(report.last_health_check_at.is_none());
        }
        assert!(registry.healthy_agents().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_agent_runs_after_healthy_probe() {
        let (registry, launcher, prober) = setup();

        assert!(registry.start_agent("code").await.unwrap());

        let report = registry.report("code").await.unwrap();
        assert_eq!(report.status, AgentStatus::Running);
        assert!(report.pid.is_some());
        assert!(report.last_health_check_at.is_some());
        assert_eq!(launcher.spawn_count("code"), 1);
        assert_eq!(prober.probe_count("code"), 1);
        assert_eq!(registry.healthy_agents().await, vec!["code"]);
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_crashed() {
        let (registry, launcher, prober) = setup();
        launcher.fail_spawn("browser");

        assert!(!registry.start_agent("browser").await.unwrap());

        let report = registry.report("browser").await.unwrap();
        assert_eq!(report.status, AgentStatus::Crashed);
        assert_eq!(report.restart_count, 0);
        assert!(report.pid.is_none());
        assert!(report.last_error.unwrap().contains("Failed to spawn"));
        assert_eq!(prober.probe_count("browser"), 0);
    }

    #[tokio::test]
    async fn test_failed_startup_probe_stops_process() {
        let (registry, launcher, prober) = setup();
        prober.push("browser", &[false]);

        assert!(!registry.start_agent("browser").await.unwrap());

        let report = registry.report("browser").await.unwrap();
        assert_eq!(report.status, AgentStatus::Crashed);
        assert!(report.pid.is_none());
        assert!(report.last_error.unwrap().contains("Health check failed"));
        assert_eq!(launcher.stop_count(), 1);
        assert_eq!(launcher.live(), 0);
    }

    #[tokio::test]
    async fn test_process_exit_during_grace_marks_crashed() {
        let (registry, launcher, prober) = setup();
        launcher.exit_on_start("code");

        assert!(!registry.start_agent("code").await.unwrap());

        let report = registry.report("code").await.unwrap();
        assert_eq!(report.status, AgentStatus::Crashed);
        assert_eq!(report.last_error.as_deref(), Some("process exited during startup"));
        assert_eq!(prober.probe_count("code"), 0);
    }

    #[tokio::test]
    async fn test_start_replaces_existing_process() {
        let (registry, launcher, _) = setup();

        assert!(registry.start_agent("casual").await.unwrap());
        assert!(registry.start_agent("casual").await.unwrap());

        assert_eq!(launcher.spawn_count("casual"), 2);
        assert_eq!(launcher.stop_count(), 1);
        assert_eq!(launcher.live(), 1);
        assert_eq!(registry.report("casual").await.unwrap().restart_count, 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (registry, launcher, _) = setup();

        assert!(registry.stop_agent("casual").await.unwrap());
        assert_eq!(launcher.stop_count(), 0);
        assert_eq!(registry.status("casual").await.unwrap(), AgentStatus::Stopped);

        assert!(registry.start_agent("casual").await.unwrap());
        assert!(registry.stop_agent("casual").await.unwrap());
        assert!(registry.stop_agent("casual").await.unwrap());

        assert_eq!(launcher.stop_count(), 1);
        assert_eq!(launcher.live(), 0);
        let report = registry.report("casual").await.unwrap();
        assert_eq!(report.status, AgentStatus::Stopped);
        assert!(report.pid.is_none());
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let (registry, _, _) = setup();

        assert!(matches!(
            registry.start_agent("translator").await,
            Err(SupervisorError::UnknownAgent(name)) if name == "translator"
        ));
        assert!(registry.restart_agent("translator").await.is_err());
        assert!(registry.status("translator").await.is_err());
    }

    #[tokio::test]
    async fn test_healthy_agent_never_toggles() {
        let (registry, launcher, prober) = setup();
        registry.start_agent("code").await.unwrap();

        for _ in 0..10 {
            assert_eq!(
                registry.supervise_agent("code").await.unwrap(),
                CheckOutcome::Healthy
            );
        }

        let report = registry.report("code").await.unwrap();
        assert_eq!(report.status, AgentStatus::Running);
        assert_eq!(report.restart_count, 0);
        assert_eq!(launcher.spawn_count("code"), 1);
        assert_eq!(prober.probe_count("code"), 11);
    }

    #[tokio::test]
    async fn test_crash_restart_until_frozen() {
        let (registry, launcher, prober) = setup();
        registry.start_agent("code").await.unwrap();

        for attempt in 1..=3 {
            // Monitor probe fails, next monitor probe fails, post-restart probe passes
            prober.push("code", &[false, false, true]);

            assert!(matches!(
                registry.supervise_agent("code").await.unwrap(),
                CheckOutcome::Crashed(_)
            ));
            assert_eq!(registry.status("code").await.unwrap(), AgentStatus::Crashed);

            assert_eq!(
                registry.supervise_agent("code").await.unwrap(),
                CheckOutcome::Restarted
            );
            let report = registry.report("code").await.unwrap();
            assert_eq!(report.status, AgentStatus::Running);
            assert_eq!(report.restart_count, attempt);
        }

        // Fourth crash: budget spent, agent freezes
        prober.set_healthy("code", false);
        assert!(matches!(
            registry.supervise_agent("code").await.unwrap(),
            CheckOutcome::Crashed(_)
        ));
        for _ in 0..3 {
            assert_eq!(
                registry.supervise_agent("code").await.unwrap(),
                CheckOutcome::RestartLimitReached
            );
        }

        let report = registry.report("code").await.unwrap();
        assert_eq!(report.status, AgentStatus::Crashed);
        assert_eq!(report.restart_count, 3);
        assert_eq!(launcher.spawn_count("code"), 4);

        // Manual restarts are refused too, repeatedly
        for _ in 0..2 {
            assert!(matches!(
                registry.restart_agent("code").await,
                Err(SupervisorError::RestartLimitExceeded { max_restarts: 3, .. })
            ));
        }
        assert_eq!(launcher.spawn_count("code"), 4);
        assert_eq!(registry.report("code").await.unwrap().restart_count, 3);
    }

    #[tokio::test]
    async fn test_crashed_agent_recovers_without_restart() {
        let (registry, launcher, prober) = setup();
        registry.start_agent("browser").await.unwrap();

        prober.push("browser", &[false]);
        registry.supervise_agent("browser").await.unwrap();
        assert_eq!(registry.status("browser").await.unwrap(), AgentStatus::Crashed);

        assert_eq!(
            registry.supervise_agent("browser").await.unwrap(),
            CheckOutcome::Recovered
        );
        let report = registry.report("browser").await.unwrap();
        assert_eq!(report.status, AgentStatus::Running);
        assert_eq!(report.restart_count, 0);
        assert!(report.last_error.is_none());
        assert_eq!(launcher.spawn_count("browser"), 1);
    }

    #[tokio::test]
    async fn test_recheck_never_restarts() {
        let (registry, launcher, prober) = setup();
        registry.start_agent("planner").await.unwrap();
        prober.set_healthy("planner", false);

        assert!(matches!(
            registry.recheck_agent("planner").await.unwrap(),
            CheckOutcome::Crashed(_)
        ));
        assert!(matches!(
            registry.recheck_agent("planner").await.unwrap(),
            CheckOutcome::StillCrashed(_)
        ));
        assert_eq!(launcher.spawn_count("planner"), 1);
        assert_eq!(registry.report("planner").await.unwrap().restart_count, 0);
    }

    #[tokio::test]
    async fn test_panicking_restart_leaves_agent_supervised() {
        let launcher = Arc::new(MockLauncher::new());
        let prober = Arc::new(ScriptedProber::new());
        let registry = Arc::new(registry_with(&launcher, &prober));
        registry.start_agent("code").await.unwrap();

        // Down for two checks, then the restart's startup probe panics
        prober.push("code", &[false, false]);
        prober.push_panic("code");
        assert!(matches!(
            registry.supervise_agent("code").await.unwrap(),
            CheckOutcome::Crashed(_)
        ));

        let task = tokio::spawn({
            let registry = registry.clone();
            async move { registry.supervise_agent("code").await }
        });
        assert!(task.await.unwrap_err().is_panic());

        let report = registry.report("code").await.unwrap();
        assert_eq!(report.status, AgentStatus::Crashed);
        assert_eq!(report.restart_count, 1);
        assert!(report.pid.is_none());
        assert_eq!(report.last_error.as_deref(), Some(INTERRUPTED_TRANSITION));
        assert!(registry.monitored_agents().await.contains(&"code".to_string()));

        // Still failing, so the next step restarts it
        prober.push("code", &[false]);
        assert_eq!(
            registry.supervise_agent("code").await.unwrap(),
            CheckOutcome::Restarted
        );
        let report = registry.report("code").await.unwrap();
        assert_eq!(report.status, AgentStatus::Running);
        assert_eq!(report.restart_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_start_settles_as_crashed() {
        let launcher = Arc::new(MockLauncher::new());
        let prober = Arc::new(ScriptedProber::new().with_delay(Duration::from_secs(5)));
        let registry = registry_with(&launcher, &prober);

        let start =
            tokio::time::timeout(Duration::from_millis(20), registry.start_agent("casual")).await;
        assert!(start.is_err());

        let report = registry.report("casual").await.unwrap();
        assert_eq!(report.status, AgentStatus::Crashed);
        assert!(report.pid.is_none());
        assert_eq!(report.last_error.as_deref(), Some(INTERRUPTED_TRANSITION));
    }

    #[tokio::test]
    async fn test_restart_waits_for_confirmed_stop() {
        let (registry, launcher, _) = setup();
        registry.start_agent("code").await.unwrap();
        launcher.refuse_stop("code");

        assert!(!registry.restart_agent("code").await.unwrap());

        let report = registry.report("code").await.unwrap();
        assert_eq!(report.status, AgentStatus::Crashed);
        assert_eq!(report.restart_count, 1);
        assert!(report.pid.is_none());
        assert!(
            report
                .last_error
                .unwrap()
                .contains("exit could not be confirmed")
        );
        assert_eq!(launcher.spawn_count("code"), 1);
    }

    #[tokio::test]
    async fn test_start_over_unstoppable_process_is_refused() {
        let (registry, launcher, prober) = setup();
        registry.start_agent("casual").await.unwrap();
        launcher.refuse_stop("casual");

        assert!(!registry.start_agent("casual").await.unwrap());

        assert_eq!(registry.status("casual").await.unwrap(), AgentStatus::Crashed);
        assert_eq!(launcher.spawn_count("casual"), 1);
        assert_eq!(prober.probe_count("casual"), 1);
        assert_eq!(registry.report("casual").await.unwrap().restart_count, 0);
    }

    #[tokio::test]
    async fn test_stopped_agents_are_not_checked() {
        let (registry, _, prober) = setup();

        assert_eq!(
            registry.supervise_agent("planner").await.unwrap(),
            CheckOutcome::Skipped(AgentStatus::Stopped)
        );
        assert_eq!(prober.probe_count("planner"), 0);
        assert!(registry.monitored_agents().await.is_empty());
    }

    #[tokio::test]
    async fn test_restart_failure_stays_crashed() {
        let (registry, launcher, prober) = setup();
        registry.start_agent("browser").await.unwrap();
        prober.push("browser", &[false]);
        registry.supervise_agent("browser").await.unwrap();

        launcher.fail_spawn("browser");
        prober.set_healthy("browser", false);
        assert_eq!(
            registry.supervise_agent("browser").await.unwrap(),
            CheckOutcome::RestartFailed
        );

        let report = registry.report("browser").await.unwrap();
        assert_eq!(report.status, AgentStatus::Crashed);
        assert_eq!(report.restart_count, 1);
        assert!(report.pid.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_restarts_serialize() {
        let launcher = Arc::new(MockLauncher::new());
        let prober = Arc::new(ScriptedProber::new().with_delay(Duration::from_millis(30)));
        let registry = Arc::new(registry_with(&launcher, &prober));
        registry.start_agent("casual").await.unwrap();

        let first = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.restart_agent("casual").await })
        };
        let second = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.restart_agent("casual").await })
        };

        assert!(first.await.unwrap().unwrap());
        assert!(second.await.unwrap().unwrap());

        let report = registry.report("casual").await.unwrap();
        assert_eq!(report.status, AgentStatus::Running);
        assert_eq!(report.restart_count, 2);
        assert_eq!(launcher.max_live(), 1);
        assert_eq!(launcher.live(), 1);
    }

    #[tokio::test]
    async fn test_manual_and_monitor_restart_do_not_interleave() {
        let launcher = Arc::new(MockLauncher::new());
        let prober = Arc::new(ScriptedProber::new().with_delay(Duration::from_millis(30)));
        let registry = Arc::new(registry_with(&launcher, &prober));
        registry.start_agent("code").await.unwrap();
        prober.push("code", &[false]);
        registry.supervise_agent("code").await.unwrap();
        assert_eq!(registry.status("code").await.unwrap(), AgentStatus::Crashed);

        let manual = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.restart_agent("code").await })
        };
        let monitor = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.supervise_agent("code").await })
        };

        manual.await.unwrap().unwrap();
        monitor.await.unwrap().unwrap();

        // Whichever went second saw a running agent and did not restart again
        let report = registry.report("code").await.unwrap();
        assert_eq!(report.status, AgentStatus::Running);
        assert!(report.restart_count <= 1);
        assert_eq!(launcher.max_live(), 1);
    }

    #[tokio::test]
    async fn test_start_all_and_stop_all() {
        let (registry, launcher, _) = setup();
        launcher.fail_spawn("browser");

        let started = registry.start_all().await;
        assert_eq!(started.len(), 4);
        assert!(!started["browser"]);
        assert!(started["casual"] && started["code"] && started["planner"]);
        assert_eq!(registry.healthy_agents().await, vec!["code", "casual", "planner"]);
        assert_eq!(
            registry.monitored_agents().await,
            vec!["browser", "code", "casual", "planner"]
        );

        let stopped = registry.stop_all().await;
        assert!(stopped.values().all(|ok| *ok));
        assert_eq!(launcher.live(), 0);
        assert!(registry.healthy_agents().await.is_empty());
    }
}
