//! Pipeline configuration

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix (`SOUL_PIPELINE_COMMAND_TIMEOUT_MS`, ...)
pub const ENV_PREFIX: &str = "SOUL_PIPELINE";

/// Configuration for a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Default barrier timeout per command (default: 30000)
    pub command_timeout_ms: u64,

    /// Slack subtracted from every timeout so a wait returns before the
    /// caller's own deadline (default: 5)
    pub scheduling_tolerance_ms: u64,

    /// Commands that may be queued behind the one in flight (default: 32)
    pub command_queue_depth: usize,

    /// Name of the control thread (default: "pipeline-control")
    pub control_thread_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 30_000,
            scheduling_tolerance_ms: 5,
            command_queue_depth: 32,
            control_thread_name: "pipeline-control".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from an optional file and the environment
    ///
    /// Values from `SOUL_PIPELINE_*` variables override the file; missing
    /// keys keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(PipelineError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            settings = settings.add_source(config::File::from(path));
        }

        settings =
            settings.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: Self = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.command_queue_depth == 0 {
            return Err(PipelineError::Config(
                "command_queue_depth must be at least 1".to_string(),
            ));
        }

        if self.scheduling_tolerance_ms >= self.command_timeout_ms {
            return Err(PipelineError::Config(format!(
                "scheduling_tolerance_ms ({}) must be smaller than command_timeout_ms ({})",
                self.scheduling_tolerance_ms, self.command_timeout_ms
            )));
        }

        if self.control_thread_name.is_empty() {
            return Err(PipelineError::Config(
                "control_thread_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Default barrier timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Scheduling tolerance
    pub fn scheduling_tolerance(&self) -> Duration {
        Duration::from_millis(self.scheduling_tolerance_ms)
    }

    /// Builder-style timeout override
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = timeout.as_millis() as u64;
        self
    }
}
