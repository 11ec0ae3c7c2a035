//! Agent descriptor table
//!
//! Static metadata about every logical agent the supervisor manages: its
//! name, capability kind, port, launch target and fallback chain. The table is
//! fixed for the lifetime of a registry.

use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Default restart budget for an agent
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Default host agents bind to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default worker binary used by the standard table
pub const DEFAULT_WORKER_PROGRAM: &str = "warden-worker";

/// Closed set of agent capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Web browsing and page extraction
    Browser,
    /// Code generation and execution
    Code,
    /// File system search and manipulation
    File,
    /// General conversation, the fallback of last resort
    Casual,
    /// Multi-step task planning across other agents
    Planner,
}

impl AgentKind {
    /// Every kind, in declaration order
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Browser,
        AgentKind::Code,
        AgentKind::File,
        AgentKind::Casual,
        AgentKind::Planner,
    ];

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Browser => "browser",
            AgentKind::Code => "code",
            AgentKind::File => "file",
            AgentKind::Casual => "casual",
            AgentKind::Planner => "planner",
        }
    }

    /// Human-readable description reported by workers
    pub fn description(&self) -> &'static str {
        match self {
            AgentKind::Browser => "Searches the web and extracts information from pages",
            AgentKind::Code => "Writes, runs and debugs code",
            AgentKind::File => "Finds, reads and organizes files",
            AgentKind::Casual => "Holds general conversation and answers simple questions",
            AgentKind::Planner => "Breaks complex tasks into steps for other agents",
        }
    }

    /// Capability tags reported by workers
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            AgentKind::Browser => &["web_search", "navigation", "form_filling", "extraction"],
            AgentKind::Code => &["code_generation", "code_execution", "debugging"],
            AgentKind::File => &["file_search", "file_read", "file_write"],
            AgentKind::Casual => &["conversation", "general_knowledge"],
            AgentKind::Planner => &["task_planning", "delegation"],
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        AgentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| WardenError::InvalidDescriptor(format!("Unknown agent kind: {}", s)))
    }
}

/// How to spawn the process backing an agent.
///
/// `args` may contain the placeholders `{name}`, `{kind}` and `{port}`, which
/// are substituted per agent at spawn time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchTarget {
    /// Program to execute (looked up on `PATH` when not absolute)
    pub program: PathBuf,

    /// Arguments, with placeholders
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the child
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory for the child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl LaunchTarget {
    /// Launch target for the reference worker binary
    pub fn worker() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_WORKER_PROGRAM),
            args: ["--agent", "{name}", "--kind", "{kind}", "--port", "{port}"]
                .into_iter()
                .map(String::from)
                .collect(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Launch target running an arbitrary program with literal arguments
    pub fn command(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }
}

/// Identity of one logical agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique key
    pub name: String,

    /// Capability kind
    pub kind: AgentKind,

    /// Port the worker listens on
    pub port: u16,

    /// Host the worker listens on
    #[serde(default = "default_host")]
    pub host: String,

    /// How to spawn the worker
    #[serde(default = "LaunchTarget::worker")]
    pub launch: LaunchTarget,

    /// Agents to try, in order, when this one is unhealthy
    #[serde(default)]
    pub fallback: Vec<String>,

    /// Restart budget before the agent is frozen
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_max_restarts() -> u32 {
    DEFAULT_MAX_RESTARTS
}

impl AgentDescriptor {
    /// Create a descriptor named after its kind, launched with the reference worker
    pub fn new(kind: AgentKind, port: u16) -> Self {
        Self {
            name: kind.as_str().to_string(),
            kind,
            port,
            host: default_host(),
            launch: LaunchTarget::worker(),
            fallback: Vec::new(),
            max_restarts: DEFAULT_MAX_RESTARTS,
        }
    }

    /// Builder: set the name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder: set the fallback chain
    pub fn with_fallback(mut self, fallback: &[&str]) -> Self {
        self.fallback = fallback.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Builder: set the restart budget
    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    /// Builder: set the launch target
    pub fn with_launch(mut self, launch: LaunchTarget) -> Self {
        self.launch = launch;
        self
    }

    /// Builder: set the host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Base URL of the worker
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Full URL of a worker endpoint
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Launch arguments with placeholders substituted
    pub fn launch_args(&self) -> Vec<String> {
        let port = self.port.to_string();
        self.launch
            .args
            .iter()
            .map(|arg| {
                arg.replace("{name}", &self.name)
                    .replace("{kind}", self.kind.as_str())
                    .replace("{port}", &port)
            })
            .collect()
    }
}

/// The fixed set of agents known to a registry, in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescriptorTable {
    agents: Vec<AgentDescriptor>,
}

impl DescriptorTable {
    /// Build a table, rejecting inconsistent descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::InvalidDescriptor`] when the table is empty, a
    /// name or port is repeated, a port is zero, or a fallback entry names an
    /// agent that is not in the table.
    pub fn new(agents: Vec<AgentDescriptor>) -> Result<Self> {
        if agents.is_empty() {
            return Err(WardenError::InvalidDescriptor(
                "At least one agent must be declared".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for agent in &agents {
            if agent.name.trim().is_empty() {
                return Err(WardenError::InvalidDescriptor(
                    "Agent name must not be empty".to_string(),
                ));
            }
            if !names.insert(agent.name.as_str()) {
                return Err(WardenError::InvalidDescriptor(format!(
                    "Duplicate agent name: {}",
                    agent.name
                )));
            }
            if agent.port == 0 {
                return Err(WardenError::InvalidDescriptor(format!(
                    "Agent {} has no port",
                    agent.name
                )));
            }
            if !ports.insert((agent.host.as_str(), agent.port)) {
                return Err(WardenError::InvalidDescriptor(format!(
                    "Port {} is assigned to more than one agent",
                    agent.port
                )));
            }
        }

        for agent in &agents {
            if let Some(unknown) = agent.fallback.iter().find(|f| !names.contains(f.as_str())) {
                return Err(WardenError::InvalidDescriptor(format!(
                    "Agent {} falls back to unknown agent {}",
                    agent.name, unknown
                )));
            }
        }

        Ok(Self { agents })
    }

    /// The standard five-agent table: every specialist falls back to `casual`,
    /// `planner` falls back to `casual` then `code`, `casual` has no fallback.
    pub fn standard() -> Self {
        Self {
            agents: standard_agents(),
        }
    }

    /// Look up a descriptor by name
    pub fn get(&self, name: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Whether the table declares `name`
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Declared fallback chain, empty for unknown agents
    pub fn fallback_chain(&self, name: &str) -> &[String] {
        self.get(name).map(|a| a.fallback.as_slice()).unwrap_or(&[])
    }

    /// Agent names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|a| a.name.as_str())
    }

    /// Descriptors in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents.iter()
    }

    /// Number of agents
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the table is empty (never true for a validated table)
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl IntoIterator for DescriptorTable {
    type Item = AgentDescriptor;
    type IntoIter = std::vec::IntoIter<AgentDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.agents.into_iter()
    }
}

pub(crate) fn standard_agents() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor::new(AgentKind::Browser, 8001).with_fallback(&["casual"]),
        AgentDescriptor::new(AgentKind::Code, 8002).with_fallback(&["casual"]),
        AgentDescriptor::new(AgentKind::File, 8003).with_fallback(&["casual"]),
        AgentDescriptor::new(AgentKind::Casual, 8004),
        AgentDescriptor::new(AgentKind::Planner, 8005).with_fallback(&["casual", "code"]),
    ]
}
