use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "ballot-pipeline.toml";
/// Prefix for environment overrides, e.g. `BALLOT_PIPELINE__QUEUE__WORKERS=8`.
pub const ENV_PREFIX: &str = "BALLOT_PIPELINE";

/// Main configuration structure. Built once at startup and handed to the
/// components that need it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Worker pool and entity store settings
    pub queue: QueueConfig,
    /// Per-task submission settings
    pub tasks: TaskConfig,
    /// Outgoing message settings
    pub notifications: NotificationConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Number of concurrent workers pulling from the queue
    pub workers: usize,
    /// How long a task waits for a row lock before giving up
    pub lock_timeout_ms: u64,
    /// Chance that a finished task is delivered a second time (0.0 - 1.0)
    pub redelivery_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaskConfig {
    /// Rate limit for per-poll stage tasks, e.g. "5/m"; unset means unthrottled
    pub poll_task_rate: Option<String>,
    /// Rate limit for voter-facing emails
    pub voter_email_rate: String,
    /// Rate limit for trustee notifications
    pub trustee_email_rate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NotificationConfig {
    /// Public URL used when building links in messages
    pub base_url: String,
    /// Sender address for all outgoing mail
    pub from_address: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Default log filter when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig {
                workers: 4,
                lock_timeout_ms: 5_000,
                redelivery_probability: 0.0,
            },
            tasks: TaskConfig {
                poll_task_rate: None,
                voter_email_rate: "20/m".to_string(),
                trustee_email_rate: Some("20/m".to_string()),
            },
            notifications: NotificationConfig {
                base_url: "http://localhost:8000".to_string(),
                from_address: "elections@localhost".to_string(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: false,
            },
        }
    }
}

impl PipelineConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (`path`, or ballot-pipeline.toml if present)
    /// 3. Environment variables (prefixed with BALLOT_PIPELINE__)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&PipelineConfig::default()).context("failed to encode defaults")?,
        );

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: PipelineConfig = builder
            .build()?
            .try_deserialize()
            .context("invalid pipeline configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.workers == 0 {
            anyhow::bail!("queue.workers must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.queue.redelivery_probability) {
            anyhow::bail!(
                "queue.redelivery_probability must be between 0 and 1, got {}",
                self.queue.redelivery_probability
            );
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.queue.lock_timeout_ms)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = PipelineConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(
            &path,
            r#"
[queue]
workers = 9
lock_timeout_ms = 250
redelivery_probability = 0.5

[tasks]
voter_email_rate = "5/s"
poll_task_rate = "10/m"
"#,
        )
        .unwrap();

        let config = PipelineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.queue.workers, 9);
        assert_eq!(config.lock_timeout(), std::time::Duration::from_millis(250));
        assert_eq!(config.tasks.voter_email_rate, "5/s");
        assert_eq!(config.tasks.poll_task_rate.as_deref(), Some("10/m"));
        // Untouched sections keep their defaults.
        assert_eq!(config.notifications, PipelineConfig::default().notifications);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = PipelineConfig::default();
        config.queue.workers = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.queue.redelivery_probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(PipelineConfig::load(Some(&missing)).is_err());
    }
}
