//! Environment variable and config file support for
//! [`SchedulerBuilder`](super::builder::SchedulerBuilder).
//!
//! # Configuration Precedence
//!
//! Highest priority first:
//!
//! 1. **Programmatic**: builder setters
//! 2. **Environment variables**: `LEGACY_SCHED_*`
//! 3. **Config file**: TOML (requires the `config-file` feature)
//! 4. **Defaults**: [`SchedulerConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `LEGACY_SCHED_MAX_TASKS` | `usize` | `max_tasks` |
//! | `LEGACY_SCHED_STACK_SIZE` | `usize` | `stack_size` |
//! | `LEGACY_SCHED_THUNKS_PER_BLOCK` | `usize` | `thunks_per_block` |
//! | `LEGACY_SCHED_MAX_THUNK_BLOCKS` | `usize` | `max_thunk_blocks` |
//! | `LEGACY_SCHED_FATAL_RESPONSE` | `abort`/`panic` | `fatal_response` |

use crate::error::ConfigError;
use crate::runtime::config::{FatalResponse, SchedulerConfig};

/// Environment variable name for the task slot limit.
pub const ENV_MAX_TASKS: &str = "LEGACY_SCHED_MAX_TASKS";
/// Environment variable name for the virtual stack size.
pub const ENV_STACK_SIZE: &str = "LEGACY_SCHED_STACK_SIZE";
/// Environment variable name for thunk block size.
pub const ENV_THUNKS_PER_BLOCK: &str = "LEGACY_SCHED_THUNKS_PER_BLOCK";
/// Environment variable name for the thunk block cap.
pub const ENV_MAX_THUNK_BLOCKS: &str = "LEGACY_SCHED_MAX_THUNK_BLOCKS";
/// Environment variable name for the reentrancy response.
pub const ENV_FATAL_RESPONSE: &str = "LEGACY_SCHED_FATAL_RESPONSE";

/// Apply environment variable overrides to a [`SchedulerConfig`].
///
/// Only variables that are set are applied. A set but unparseable variable is
/// an error and leaves the config partially updated up to that variable.
pub fn apply_env_overrides(config: &mut SchedulerConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_MAX_TASKS) {
        config.max_tasks = parse_usize(ENV_MAX_TASKS, &val)?;
    }
    if let Some(val) = read_env(ENV_STACK_SIZE) {
        config.stack_size = parse_usize(ENV_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_THUNKS_PER_BLOCK) {
        config.thunks_per_block = parse_usize(ENV_THUNKS_PER_BLOCK, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_THUNK_BLOCKS) {
        config.max_thunk_blocks = parse_usize(ENV_MAX_THUNK_BLOCKS, &val)?;
    }
    if let Some(val) = read_env(ENV_FATAL_RESPONSE) {
        config.fatal_response = parse_fatal(ENV_FATAL_RESPONSE, &val)?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(key: &str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected unsigned integer, got {val:?} ({e})"),
        })
}

fn parse_fatal(key: &str, val: &str) -> Result<FatalResponse, ConfigError> {
    FatalResponse::parse(val).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("expected abort or panic, got {val:?}"),
    })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable scheduler configuration.
///
/// ```toml
/// [scheduler]
/// max_tasks = 128
/// stack_size = 32768
/// thunks_per_block = 16
/// max_thunk_blocks = 8
/// fatal_response = "panic"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerTomlConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
}

/// `[scheduler]` table of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// Task slot limit.
    pub max_tasks: Option<usize>,
    /// Virtual stack size in bytes.
    pub stack_size: Option<usize>,
    /// Slots per thunk block.
    pub thunks_per_block: Option<usize>,
    /// Thunk block cap per task.
    pub max_thunk_blocks: Option<usize>,
    /// `abort` or `panic`.
    pub fatal_response: Option<String>,
}

/// Apply a parsed TOML config; only keys present in the file override.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(
    config: &mut SchedulerConfig,
    toml: &SchedulerTomlConfig,
) -> Result<(), ConfigError> {
    let table = &toml.scheduler;
    if let Some(v) = table.max_tasks {
        config.max_tasks = v;
    }
    if let Some(v) = table.stack_size {
        config.stack_size = v;
    }
    if let Some(v) = table.thunks_per_block {
        config.thunks_per_block = v;
    }
    if let Some(v) = table.max_thunk_blocks {
        config.max_thunk_blocks = v;
    }
    if let Some(ref v) = table.fatal_response {
        config.fatal_response = parse_fatal("scheduler.fatal_response", v)?;
    }
    Ok(())
}

/// Parse a TOML string into a [`SchedulerTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<SchedulerTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file into a [`SchedulerTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<SchedulerTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_toml_str(&content)
}
