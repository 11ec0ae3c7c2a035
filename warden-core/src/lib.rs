//! # Warden core
//!
//! Shared building blocks for the warden agent supervisor:
//! - **Descriptor table**: which logical agents exist, their ports, launch
//!   targets and fallback chains
//! - **Protocol**: the HTTP bodies exchanged with worker processes and the
//!   normalized response envelope
//! - **Configuration**: layered loading of supervisor settings and the agent
//!   table
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use warden_core::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let config = WardenConfig::load()?;
//!     let table = config.descriptor_table()?;
//!
//!     for agent in table.iter() {
//!         println!("{} -> {} (fallback: {:?})", agent.name, agent.port, agent.fallback);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod protocol;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{SupervisorSettings, WardenConfig, WorkerOutput};
    pub use crate::descriptor::{AgentDescriptor, AgentKind, DescriptorTable, LaunchTarget};
    pub use crate::error::{Result, WardenError};
    pub use crate::protocol::{
        HealthReport, NormalizedResponse, QueryRequest, WorkerReply, WorkerStatus,
    };
}
