//! Configuration types for stepwise
//!
//! Defines:
//! - `Settings` - Top-level `stepwise.toml` contents
//! - `LimitSettings` - Step and time limits applied to every trace
//! - `TracerConfig` - How to launch the tracer for one language

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use stepwise_core::prelude::*;
use stepwise_tracer::LinePolicy;

/// Global settings from `stepwise.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub limits: LimitSettings,

    #[serde(default)]
    pub output: OutputSettings,

    /// Tracer launch commands keyed by language name
    #[serde(default)]
    pub tracers: BTreeMap<String, TracerConfig>,
}

impl Settings {
    /// Reject values that would make every trace fail.
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()
    }
}

/// Limits applied when driving a trace
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimitSettings {
    /// Maximum number of `step` commands per run
    #[serde(default = "default_steps")]
    pub steps: usize,

    /// Wall-clock limit for each `start`/`step` command
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long a stopped tracer may take to exit before it is killed
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            timeout_ms: default_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl LimitSettings {
    /// `steps` and `timeout_ms` must be positive.
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(Error::config("limits.steps must be at least 1"));
        }
        if self.timeout_ms == 0 {
            return Err(Error::config("limits.timeout_ms must be at least 1"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_steps() -> usize {
    1000
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_shutdown_grace_ms() -> u64 {
    500
}

/// Output settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutputSettings {
    /// Log every batch in full, not just its sentinel
    #[serde(default)]
    pub verbose: bool,
}

/// Launch settings for one language's tracer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TracerConfig {
    /// Shell command line that starts the tracer
    pub command: String,

    #[serde(default)]
    pub policy: PolicySetting,
}

/// Config-file spelling of [`LinePolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySetting {
    #[default]
    Strict,
    Lenient,
}

impl From<PolicySetting> for LinePolicy {
    fn from(setting: PolicySetting) -> Self {
        match setting {
            PolicySetting::Strict => LinePolicy::Strict,
            PolicySetting::Lenient => LinePolicy::Lenient,
        }
    }
}
