use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DispatchError, Result};
use crate::unit::CrashPolicy;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// What a crashing unit does to the rest of its scope
    pub crash_policy: CrashPolicy,
    /// Buffered messages per subscriber in the broadcast notifier
    pub broadcast_capacity: usize,
    /// Countdown announced before a pending system action runs
    pub power_countdown_secs: u64,
    /// Tracing output
    pub logging: LoggingConfig,
}

/// Tracing subscriber settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Colored output
    pub ansi: bool,
    /// Include the event target (module path)
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
            with_target: false,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            crash_policy: CrashPolicy::CancelScope,
            broadcast_capacity: 256,
            power_countdown_secs: 60,
            logging: LoggingConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Create a new builder for SchedulerConfig
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::new()
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DispatchError::io(format!("read {}", path.display()), e))?;
        Self::from_yaml_str(&raw)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.broadcast_capacity == 0 {
            return Err(DispatchError::configuration(
                "broadcast_capacity must be greater than 0",
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(DispatchError::configuration(
                "logging.level must not be empty",
            ));
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(DispatchError::configuration(format!(
                "logging.level is not a valid filter: {}",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Verbose logging, short countdown
    pub fn development() -> Self {
        Self {
            power_countdown_secs: 5,
            logging: LoggingConfig {
                level: "debug".to_string(),
                ansi: true,
                with_target: true,
            },
            ..Default::default()
        }
    }

    /// Quiet logging, larger fan-out buffer
    pub fn production() -> Self {
        Self {
            broadcast_capacity: 1024,
            logging: LoggingConfig {
                level: "info".to_string(),
                ansi: false,
                with_target: false,
            },
            ..Default::default()
        }
    }
}

/// Builder for SchedulerConfig
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    pub fn crash_policy(mut self, policy: CrashPolicy) -> Self {
        self.config.crash_policy = policy;
        self
    }

    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.config.broadcast_capacity = capacity;
        self
    }

    pub fn power_countdown_secs(mut self, secs: u64) -> Self {
        self.config.power_countdown_secs = secs;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<SchedulerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.crash_policy, CrashPolicy::CancelScope);
    }

    #[test]
    fn test_presets_validate() {
        assert!(SchedulerConfig::development().validate().is_ok());
        assert!(SchedulerConfig::production().validate().is_ok());
        assert_eq!(SchedulerConfig::development().logging.level, "debug");
    }

    #[test]
    fn test_validation_errors() {
        let mut config = SchedulerConfig::default();
        config.broadcast_capacity = 0;
        assert!(config.validate().is_err());

        config.broadcast_capacity = 8;
        config.logging.level = "   ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::builder()
            .crash_policy(CrashPolicy::Isolate)
            .broadcast_capacity(32)
            .power_countdown_secs(10)
            .log_level("mas_dispatch=trace")
            .build()
            .unwrap();

        assert_eq!(config.crash_policy, CrashPolicy::Isolate);
        assert_eq!(config.broadcast_capacity, 32);
        assert_eq!(config.power_countdown_secs, 10);
    }

    #[test]
    fn test_yaml_partial_document() {
        let config = SchedulerConfig::from_yaml_str(
            "crash_policy: isolate\nlogging:\n  level: warn\n",
        )
        .unwrap();
        assert_eq!(config.crash_policy, CrashPolicy::Isolate);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.broadcast_capacity, 256);
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "power_countdown_secs: 3").unwrap();
        let config = SchedulerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.power_countdown_secs, 3);

        assert!(SchedulerConfig::from_yaml_file("/nonexistent/mas.yaml").is_err());
    }
}
