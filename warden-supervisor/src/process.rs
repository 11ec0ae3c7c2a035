//! Process lifecycle management for agent workers
//!
//! Spawns one OS process per agent, stops it with SIGTERM followed by a
//! bounded wait and a forced kill, and answers non-blocking liveness checks.

use crate::{Result, SupervisorError};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};
use warden_core::config::WorkerOutput;
use warden_core::descriptor::AgentDescriptor;

/// Environment variable carrying the agent name into the worker
pub const AGENT_NAME_ENV: &str = "WARDEN_AGENT_NAME";

/// Environment variable carrying the agent port into the worker
pub const AGENT_PORT_ENV: &str = "WARDEN_AGENT_PORT";

/// Ownership of the OS process backing one agent.
///
/// Handles are not `Clone`: whoever holds the handle owns the process, and
/// [`ProcessLauncher::stop_gracefully`] consumes it.
#[derive(Debug)]
pub struct ProcessHandle {
    agent: String,
    pid: u32,
    child: Option<Child>,
}

impl ProcessHandle {
    fn owned(agent: &str, pid: u32, child: Child) -> Self {
        Self {
            agent: agent.to_string(),
            pid,
            child: Some(child),
        }
    }

    /// Handle for a process not spawned by this launcher, tracked by pid only.
    ///
    /// Its exit is only observable once its parent has reaped it.
    pub fn detached(agent: impl Into<String>, pid: u32) -> Self {
        Self {
            agent: agent.into(),
            pid,
            child: None,
        }
    }

    /// Process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Agent this process backs
    pub fn agent(&self) -> &str {
        &self.agent
    }
}

/// Starts, stops and checks the OS processes backing agents
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Launch the worker for `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Spawn`] if the launch target cannot be executed.
    async fn spawn(&self, descriptor: &AgentDescriptor) -> Result<ProcessHandle>;

    /// Terminate the process, escalating to a forced kill after `timeout`.
    ///
    /// Returns `true` once the process is confirmed dead and `false` when the
    /// kill was refused or its exit could not be observed.
    async fn stop_gracefully(&self, handle: ProcessHandle, timeout: Duration) -> bool;

    /// Non-blocking OS-level liveness check
    fn is_alive(&self, handle: &mut ProcessHandle) -> bool;
}

/// Launcher backed by real child processes
#[derive(Debug, Clone, Default)]
pub struct OsProcessLauncher {
    output: WorkerOutput,
}

impl OsProcessLauncher {
    /// Create a launcher
    pub fn new(output: WorkerOutput) -> Self {
        Self { output }
    }

    async fn force_kill(agent: &str, child: &mut Child) -> bool {
        match child.kill().await {
            Ok(()) => {
                info!("Agent {} force killed", agent);
                true
            }
            Err(e) => {
                // kill() fails on a child that was reaped in the meantime
                if let Ok(Some(status)) = child.try_wait() {
                    debug!("Agent {} exited before kill ({})", agent, status);
                    return true;
                }
                error!("Failed to kill agent {}: {}", agent, e);
                false
            }
        }
    }
}

#[async_trait]
impl ProcessLauncher for OsProcessLauncher {
    async fn spawn(&self, descriptor: &AgentDescriptor) -> Result<ProcessHandle> {
        let launch = &descriptor.launch;
        info!(
            "Spawning agent {} on port {}: {} {:?}",
            descriptor.name,
            descriptor.port,
            launch.program.display(),
            descriptor.launch_args()
        );

        let mut cmd = Command::new(&launch.program);
        cmd.args(descriptor.launch_args())
            .envs(&launch.env)
            .env(AGENT_NAME_ENV, &descriptor.name)
            .env(AGENT_PORT_ENV, descriptor.port.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match self.output {
            WorkerOutput::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            WorkerOutput::Null => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        if let Some(ref working_dir) = launch.working_dir {
            cmd.current_dir(working_dir);
        }

        let child = cmd.spawn().map_err(|e| SupervisorError::Spawn {
            agent: descriptor.name.clone(),
            reason: format!("{}: {}", launch.program.display(), e),
        })?;

        let pid = child.id().ok_or_else(|| SupervisorError::Spawn {
            agent: descriptor.name.clone(),
            reason: "process exited before its pid could be read".to_string(),
        })?;

        debug!("Agent {} spawned with PID {}", descriptor.name, pid);
        Ok(ProcessHandle::owned(&descriptor.name, pid, child))
    }

    async fn stop_gracefully(&self, handle: ProcessHandle, timeout: Duration) -> bool {
        let ProcessHandle { agent, pid, child } = handle;

        let Some(mut child) = child else {
            debug!("Agent {} (PID {}) is not a child of this launcher", agent, pid);
            return stop_by_pid(&agent, pid, timeout).await;
        };

        if let Ok(Some(status)) = child.try_wait() {
            info!("Agent {} had already exited ({})", agent, status);
            return true;
        }

        info!("Stopping agent {} (PID {})", agent, pid);

        // Ask nicely first
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            match i32::try_from(pid) {
                Ok(raw) => {
                    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                        warn!("Failed to send SIGTERM to agent {}: {}", agent, e);
                    }
                }
                Err(_) => warn!("PID {} of agent {} does not fit a pid_t", pid, agent),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = child.start_kill() {
                warn!("Failed to terminate agent {}: {}", agent, e);
            }
        }

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Agent {} stopped gracefully ({})", agent, status);
                true
            }
            Ok(Err(e)) => {
                warn!("Error waiting for agent {} shutdown: {}", agent, e);
                Self::force_kill(&agent, &mut child).await
            }
            Err(_) => {
                warn!(
                    "Agent {} did not exit within {:?}, force killing",
                    agent, timeout
                );
                Self::force_kill(&agent, &mut child).await
            }
        }
    }

    fn is_alive(&self, handle: &mut ProcessHandle) -> bool {
        match handle.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => pid_exists(handle.pid),
        }
    }
}

/// Interval between liveness checks while waiting on a pid
#[cfg(unix)]
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Time allowed for a process to disappear after SIGKILL
#[cfg(unix)]
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(unix)]
async fn stop_by_pid(agent: &str, pid: u32, timeout: Duration) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if !pid_exists(pid) {
        info!("Agent {} had already exited", agent);
        return true;
    }

    let Ok(raw) = i32::try_from(pid) else {
        error!("PID {} of agent {} does not fit a pid_t", pid, agent);
        return false;
    };
    let target = Pid::from_raw(raw);

    info!("Stopping agent {} (PID {})", agent, pid);
    if let Err(e) = kill(target, Signal::SIGTERM) {
        warn!("Failed to send SIGTERM to agent {}: {}", agent, e);
    }
    if wait_for_exit(pid, timeout).await {
        info!("Agent {} stopped gracefully", agent);
        return true;
    }

    warn!(
        "Agent {} did not exit within {:?}, force killing",
        agent, timeout
    );
    if let Err(e) = kill(target, Signal::SIGKILL) {
        warn!("Failed to send SIGKILL to agent {}: {}", agent, e);
    }
    if wait_for_exit(pid, KILL_CONFIRM_TIMEOUT).await {
        info!("Agent {} force killed", agent);
        true
    } else {
        error!("Agent {} (PID {}) is still present after SIGKILL", agent, pid);
        false
    }
}

#[cfg(not(unix))]
async fn stop_by_pid(agent: &str, pid: u32, _timeout: Duration) -> bool {
    error!("Cannot stop agent {} (PID {}) without owning its process", agent, pid);
    false
}

#[cfg(unix)]
async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, async {
        while pid_exists(pid) {
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    })
    .await
    .is_ok()
}

#[cfg(unix)]
fn pid_exists(pid: u32) -> bool {
    use nix::unistd::Pid;

    i32::try_from(pid)
        .map(|raw| nix::sys::signal::kill(Pid::from_raw(raw), None).is_ok())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn pid_exists(_pid: u32) -> bool {
    true
}
