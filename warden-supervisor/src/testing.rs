//! In-memory launcher, prober and worker client for unit tests

use crate::dispatch::WorkerClient;
use crate::error::TransportError;
use crate::probe::{HealthProber, HealthStatus};
use crate::process::{ProcessHandle, ProcessLauncher};
use crate::registry::RegistrySettings;
use crate::{Result, SupervisorError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use warden_core::descriptor::{AgentDescriptor, AgentKind, DescriptorTable};
use warden_core::protocol::{QueryRequest, WorkerReply};

/// Zero grace and pause so state machine tests run instantly
pub(crate) fn fast_settings() -> RegistrySettings {
    RegistrySettings {
        startup_grace: Duration::ZERO,
        shutdown_timeout: Duration::from_secs(1),
        restart_pause: Duration::ZERO,
    }
}

/// browser, code, casual and planner with their usual fallback chains
pub(crate) fn scenario_table(max_restarts: u32) -> DescriptorTable {
    DescriptorTable::new(vec![
        AgentDescriptor::new(AgentKind::Browser, 18001)
            .with_fallback(&["casual"])
            .with_max_restarts(max_restarts),
        AgentDescriptor::new(AgentKind::Code, 18002)
            .with_fallback(&["casual"])
            .with_max_restarts(max_restarts),
        AgentDescriptor::new(AgentKind::Casual, 18004).with_max_restarts(max_restarts),
        AgentDescriptor::new(AgentKind::Planner, 18005)
            .with_fallback(&["casual", "code"])
            .with_max_restarts(max_restarts),
    ])
    .expect("scenario table is valid")
}

/// Launcher handing out fake pids and tracking which are alive
#[derive(Default)]
pub(crate) struct MockLauncher {
    next_pid: AtomicU32,
    spawns: Mutex<HashMap<String, usize>>,
    stops: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    exiting: Mutex<HashSet<String>>,
    stuck: Mutex<HashSet<String>>,
    live: Mutex<HashSet<u32>>,
    max_live: AtomicUsize,
}

impl MockLauncher {
    pub(crate) fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(40_000),
            ..Default::default()
        }
    }

    pub(crate) fn fail_spawn(&self, agent: &str) {
        self.failing.lock().unwrap().insert(agent.to_string());
    }

    /// Stops of `agent` report that its exit could not be confirmed
    pub(crate) fn refuse_stop(&self, agent: &str) {
        self.stuck.lock().unwrap().insert(agent.to_string());
    }

    pub(crate) fn exit_on_start(&self, agent: &str) {
        self.exiting.lock().unwrap().insert(agent.to_string());
    }

    pub(crate) fn spawn_count(&self, agent: &str) -> usize {
        self.spawns.lock().unwrap().get(agent).copied().unwrap_or(0)
    }

    pub(crate) fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub(crate) fn live(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub(crate) fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessLauncher for MockLauncher {
    async fn spawn(&self, descriptor: &AgentDescriptor) -> Result<ProcessHandle> {
        *self
            .spawns
            .lock()
            .unwrap()
            .entry(descriptor.name.clone())
            .or_default() += 1;

        if self.failing.lock().unwrap().contains(&descriptor.name) {
            return Err(SupervisorError::Spawn {
                agent: descriptor.name.clone(),
                reason: "mock spawn failure".to_string(),
            });
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let live = {
            let mut live = self.live.lock().unwrap();
            live.insert(pid);
            live.len()
        };
        self.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(ProcessHandle::detached(descriptor.name.clone(), pid))
    }

    async fn stop_gracefully(&self, handle: ProcessHandle, _timeout: Duration) -> bool {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.stuck.lock().unwrap().contains(handle.agent()) {
            return false;
        }
        self.live.lock().unwrap().remove(&handle.pid());
        true
    }

    fn is_alive(&self, handle: &mut ProcessHandle) -> bool {
        !self.exiting.lock().unwrap().contains(handle.agent())
    }
}

#[derive(Debug, Clone, Copy)]
enum ScriptedProbe {
    Healthy,
    Unhealthy,
    Panic,
}

/// Prober answering from per-agent scripts, then a per-agent default
#[derive(Default)]
pub(crate) struct ScriptedProber {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedProbe>>>,
    defaults: Mutex<HashMap<String, bool>>,
    probes: Mutex<HashMap<String, usize>>,
    delay: Duration,
}

impl ScriptedProber {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue results consumed by the next probes of `agent`
    pub(crate) fn push(&self, agent: &str, results: &[bool]) {
        self.enqueue(
            agent,
            results.iter().map(|healthy| {
                if *healthy {
                    ScriptedProbe::Healthy
                } else {
                    ScriptedProbe::Unhealthy
                }
            }),
        );
    }

    /// Queue a probe of `agent` that panics instead of answering
    pub(crate) fn push_panic(&self, agent: &str) {
        self.enqueue(agent, [ScriptedProbe::Panic]);
    }

    fn enqueue(&self, agent: &str, probes: impl IntoIterator<Item = ScriptedProbe>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(agent.to_string())
            .or_default()
            .extend(probes);
    }

    /// Result once the script for `agent` runs out
    pub(crate) fn set_healthy(&self, agent: &str, healthy: bool) {
        self.defaults
            .lock()
            .unwrap()
            .insert(agent.to_string(), healthy);
    }

    pub(crate) fn probe_count(&self, agent: &str) -> usize {
        self.probes.lock().unwrap().get(agent).copied().unwrap_or(0)
    }
}

#[async_trait]
impl HealthProber for ScriptedProber {
    async fn probe(&self, descriptor: &AgentDescriptor) -> HealthStatus {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        *self
            .probes
            .lock()
            .unwrap()
            .entry(descriptor.name.clone())
            .or_default() += 1;

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&descriptor.name)
            .and_then(|queue| queue.pop_front());
        let probe = scripted.unwrap_or_else(|| {
            let healthy = self
                .defaults
                .lock()
                .unwrap()
                .get(&descriptor.name)
                .copied()
                .unwrap_or(true);
            if healthy {
                ScriptedProbe::Healthy
            } else {
                ScriptedProbe::Unhealthy
            }
        });

        match probe {
            ScriptedProbe::Healthy => HealthStatus::Healthy,
            ScriptedProbe::Unhealthy => HealthStatus::Unhealthy("scripted failure".to_string()),
            ScriptedProbe::Panic => panic!("scripted probe panic for {}", descriptor.name),
        }
    }
}

/// Worker client answering with canned replies or transport errors
#[derive(Default)]
pub(crate) struct ScriptedClient {
    outcomes: Mutex<HashMap<String, std::result::Result<WorkerReply, TransportError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(&self, agent: &str, reply: WorkerReply) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(agent.to_string(), Ok(reply));
    }

    pub(crate) fn time_out(&self, agent: &str) {
        self.outcomes.lock().unwrap().insert(
            agent.to_string(),
            Err(TransportError::Timeout {
                agent: agent.to_string(),
                timeout: Duration::from_secs(120),
            }),
        );
    }

    pub(crate) fn refuse(&self, agent: &str) {
        self.outcomes.lock().unwrap().insert(
            agent.to_string(),
            Err(TransportError::Connect {
                agent: agent.to_string(),
                reason: "connection refused".to_string(),
            }),
        );
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerClient for ScriptedClient {
    async fn query(
        &self,
        descriptor: &AgentDescriptor,
        request: &QueryRequest,
    ) -> std::result::Result<WorkerReply, TransportError> {
        self.calls.lock().unwrap().push(descriptor.name.clone());

        self.outcomes
            .lock()
            .unwrap()
            .get(&descriptor.name)
            .cloned()
            .unwrap_or_else(|| {
                Ok(WorkerReply {
                    answer: format!("{} handled: {}", descriptor.name, request.query),
                    ..Default::default()
                })
            })
    }
}
