//! Warden Supervisor - process supervision and fault-tolerant routing for agent workers
//!
//! Runs each logical agent as an isolated OS process, keeps it alive with a
//! periodic health monitor and a bounded restart budget, and routes queries
//! to the first healthy agent in the requested agent's fallback chain.
//!
//! ## Lifecycle
//!
//! Every agent moves through a small state machine:
//!
//! ```text
//! Stopped -> Starting -> Running <-> Crashed -> Restarting -> Running
//!                     \-> Crashed            \-> Crashed
//! ```
//!
//! Transitions for one agent are serialized; different agents never wait on
//! each other. An agent whose restart budget is spent stays `Crashed` until an
//! operator starts it again.
//!
//! ## Example
//!
//! ```rust,no_run
//! use warden_core::prelude::*;
//! use warden_supervisor::Supervisor;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let supervisor = Supervisor::new(WardenConfig::load()?)?;
//! supervisor.start_all().await;
//! supervisor.start_monitor().await;
//!
//! let response = supervisor
//!     .dispatch(&QueryRequest::new("summarize README.md"), Some("file"))
//!     .await;
//! println!("{} answered: {}", response.agent_name, response.answer);
//!
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod dispatch;
mod error;
mod monitor;
mod probe;
mod process;
mod registry;
mod router;
mod supervisor;

#[cfg(test)]
mod testing;

pub use dispatch::{DispatchAttempt, DispatchOutcome, Dispatcher, HttpWorkerClient, WorkerClient};
pub use error::{Result, SupervisorError, TransportError};
pub use monitor::{CycleReport, HealthMonitor, MonitorHandle, MonitorSettings};
pub use probe::{HealthProber, HealthStatus, HttpHealthProber};
pub use process::{
    AGENT_NAME_ENV, AGENT_PORT_ENV, OsProcessLauncher, ProcessHandle, ProcessLauncher,
};
pub use registry::{AgentRegistry, AgentStatus, AgentStatusReport, CheckOutcome, RegistrySettings};
pub use router::FallbackRouter;
pub use supervisor::{OverallHealth, Supervisor, SupervisorBuilder, SystemStatus};
