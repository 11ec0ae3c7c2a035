//! Configuration types for warden
//!
//! Configuration is layered with figment: built-in defaults, then a TOML file,
//! then `WARDEN_`-prefixed environment variables.

use crate::descriptor::{AgentDescriptor, DescriptorTable, standard_agents};
use crate::error::{Result, WardenError};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file name
pub const CONFIG_FILE: &str = "warden.toml";

/// Environment variable naming an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "WARDEN_CONFIG_PATH";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "WARDEN_";

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Supervisor timing and routing settings
    pub supervisor: SupervisorSettings,

    /// Agent descriptor table
    pub agents: Vec<AgentDescriptor>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorSettings::default(),
            agents: standard_agents(),
        }
    }
}

/// Supervisor timing and routing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Period of the health monitor loop
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,

    /// Wait between spawning a worker and its single startup probe
    #[serde(with = "humantime_serde")]
    pub startup_grace: Duration,

    /// Time a worker gets to exit after SIGTERM before it is killed
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Pause between stop and start inside a restart
    #[serde(with = "humantime_serde")]
    pub restart_pause: Duration,

    /// Timeout of a single health probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Timeout of a single forwarded query
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Probe agents concurrently in each monitor cycle
    pub parallel_probes: bool,

    /// Agent used when a dispatch names no preferred agent
    pub default_agent: String,

    /// What to do with worker stdout/stderr
    pub worker_output: WorkerOutput,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(10),
            startup_grace: Duration::from_secs(3),
            shutdown_timeout: Duration::from_secs(5),
            restart_pause: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(120),
            parallel_probes: true,
            default_agent: "casual".to_string(),
            worker_output: WorkerOutput::Inherit,
        }
    }
}

/// Destination of worker stdout/stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerOutput {
    /// Share the supervisor's stdout/stderr
    #[default]
    Inherit,
    /// Discard
    Null,
}

impl WardenConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (`warden.toml` or the path in `WARDEN_CONFIG_PATH`)
    /// 3. Environment variable overrides (`WARDEN_SUPERVISOR__PROBE_TIMEOUT=2s`)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is invalid or the result
    /// fails validation.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| CONFIG_FILE.to_string());
        Self::load_from(path)
    }

    /// Load configuration from a specific file path, still applying
    /// environment overrides.
    ///
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(WardenConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::extract(figment)
    }

    /// Load configuration from exactly one file, ignoring the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be parsed, or fails
    /// validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(WardenError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let figment =
            Figment::from(Serialized::defaults(WardenConfig::default())).merge(Toml::file(path));

        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: WardenConfig = figment.extract().map_err(|e| {
            WardenError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent table is inconsistent, the default agent
    /// is not declared, or a timing value is zero where that would spin.
    pub fn validate(&self) -> Result<()> {
        let table = self.descriptor_table()?;

        if !table.contains(&self.supervisor.default_agent) {
            return Err(WardenError::Configuration(format!(
                "Default agent {} is not declared",
                self.supervisor.default_agent
            )));
        }

        if self.supervisor.health_check_interval.is_zero() {
            return Err(WardenError::Configuration(
                "health_check_interval must be greater than zero".to_string(),
            ));
        }

        if self.supervisor.probe_timeout.is_zero() || self.supervisor.request_timeout.is_zero() {
            return Err(WardenError::Configuration(
                "probe_timeout and request_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the validated descriptor table.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::InvalidDescriptor`] for an inconsistent table.
    pub fn descriptor_table(&self) -> Result<DescriptorTable> {
        DescriptorTable::new(self.agents.clone())
    }
}
