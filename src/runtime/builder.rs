//! Scheduler builder.
//!
//! ```ignore
//! let scheduler = SchedulerBuilder::from_toml("config/sched.toml")?
//!     .with_env_overrides()?
//!     .max_tasks(64)
//!     .build(ParkingBridge::new());
//! ```
//!
//! Later calls override earlier ones, so applying the file, then the
//! environment, then explicit setters gives the documented precedence.

use crate::error::ConfigError;
use crate::runtime::bridge::HostBridge;
use crate::runtime::config::{FatalResponse, SchedulerConfig};
use crate::runtime::env_config;
use crate::runtime::scheduler::Scheduler;

/// Builder for a [`Scheduler`] with custom configuration.
#[derive(Clone, Debug, Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
}

impl SchedulerBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an explicit configuration.
    #[must_use]
    pub fn from_config(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Set the maximum number of resident tasks.
    #[must_use]
    pub fn max_tasks(mut self, n: usize) -> Self {
        self.config.max_tasks = n;
        self
    }

    /// Set the virtual stack size per task.
    #[must_use]
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = size;
        self
    }

    /// Set the number of slots added each time a thunk pool grows.
    #[must_use]
    pub fn thunks_per_block(mut self, n: usize) -> Self {
        self.config.thunks_per_block = n;
        self
    }

    /// Set the per-task thunk block cap.
    #[must_use]
    pub fn max_thunk_blocks(mut self, n: usize) -> Self {
        self.config.max_thunk_blocks = n;
        self
    }

    /// Choose how a reentrant dispatch is handled.
    #[must_use]
    pub fn fatal_response(mut self, response: FatalResponse) -> Self {
        self.config.fatal_response = response;
        self
    }

    /// Apply `LEGACY_SCHED_*` environment variables on top of the current values.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        env_config::apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Start from a TOML file's `[scheduler]` table.
    #[cfg(feature = "config-file")]
    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let parsed = env_config::parse_toml_file(path.as_ref())?;
        let mut config = SchedulerConfig::default();
        env_config::apply_toml_config(&mut config, &parsed)?;
        Ok(Self { config })
    }

    /// Start from TOML text.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let parsed = env_config::parse_toml_str(toml)?;
        let mut config = SchedulerConfig::default();
        env_config::apply_toml_config(&mut config, &parsed)?;
        Ok(Self { config })
    }

    /// The configuration as it stands, before normalization.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Build a scheduler driving `bridge`.
    #[must_use]
    pub fn build<B: HostBridge>(self, bridge: B) -> Scheduler<B> {
        Scheduler::with_config(self.config, bridge)
    }
}
