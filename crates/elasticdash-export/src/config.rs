//! Configuration of the export worker.

use std::{fmt, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{
    client::ClientConfig,
    retry::RetryPolicy,
    worker::EngineConfig,
};

const CONFIG_FILE: &str = "elasticdash.toml";

/// Worker configuration with defaults, file and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`elasticdash.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Destination credentials have no default. A destination whose credential
/// is missing still gets its handler; its jobs fail with a configuration
/// error.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `DATABASE_URL`
    #[serde(default = "default_database_url", alias = "DATABASE_URL")]
    pub database_url: String,
    /// Maximum number of database connections in the pool.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,

    // Workers
    /// Number of concurrent queue workers.
    ///
    /// Environment variable: `WORKER_POOL_SIZE`
    #[serde(default = "default_worker_count", alias = "WORKER_POOL_SIZE")]
    pub worker_pool_size: usize,
    /// Maximum jobs claimed per poll.
    ///
    /// Environment variable: `WORKER_QUEUE_SIZE`
    #[serde(default = "default_batch_size", alias = "WORKER_QUEUE_SIZE")]
    pub worker_queue_size: usize,
    /// Seconds to wait for in-flight jobs on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout", alias = "SHUTDOWN_TIMEOUT_SECONDS")]
    pub shutdown_timeout_seconds: u64,
    /// Seconds a claimed job stays reserved for its worker. A job still
    /// `running` past its lease is claimable again.
    ///
    /// Environment variable: `JOB_LEASE_SECONDS`
    #[serde(default = "default_job_lease", alias = "JOB_LEASE_SECONDS")]
    pub job_lease_seconds: u64,

    // Retry
    /// Maximum attempts per job.
    ///
    /// Environment variable: `MAX_RETRY_ATTEMPTS`
    #[serde(default = "default_retry_attempts", alias = "MAX_RETRY_ATTEMPTS")]
    pub max_retry_attempts: u32,
    /// Base delay for exponential backoff in milliseconds.
    ///
    /// Environment variable: `RETRY_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms", alias = "RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    ///
    /// Environment variable: `RETRY_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms", alias = "RETRY_MAX_DELAY_MS")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    ///
    /// Environment variable: `RETRY_JITTER_FACTOR`
    #[serde(default = "default_jitter_factor", alias = "RETRY_JITTER_FACTOR")]
    pub retry_jitter_factor: f64,

    // Destinations
    /// Destination request timeout in seconds.
    ///
    /// Environment variable: `DESTINATION_TIMEOUT_SECONDS`
    #[serde(default = "default_destination_timeout", alias = "DESTINATION_TIMEOUT_SECONDS")]
    pub destination_timeout_seconds: u64,
    /// Maximum events per destination request.
    ///
    /// Environment variable: `EXPORT_BATCH_SIZE`
    #[serde(default = "default_export_batch_size", alias = "EXPORT_BATCH_SIZE")]
    pub export_batch_size: usize,
    /// PostHog project API key.
    ///
    /// Environment variable: `POSTHOG_API_KEY`
    #[serde(default, alias = "POSTHOG_API_KEY", skip_serializing_if = "Option::is_none")]
    pub posthog_api_key: Option<String>,
    /// PostHog ingestion host.
    ///
    /// Environment variable: `POSTHOG_HOST`
    #[serde(default = "default_posthog_host", alias = "POSTHOG_HOST")]
    pub posthog_host: String,
    /// Mixpanel project token.
    ///
    /// Environment variable: `MIXPANEL_TOKEN`
    #[serde(default, alias = "MIXPANEL_TOKEN", skip_serializing_if = "Option::is_none")]
    pub mixpanel_token: Option<String>,
    /// Mixpanel ingestion host.
    ///
    /// Environment variable: `MIXPANEL_HOST`
    #[serde(default = "default_mixpanel_host", alias = "MIXPANEL_HOST")]
    pub mixpanel_host: String,

    // Logging
    /// Log filter directive.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, `elasticdash.toml` and the
    /// environment, then validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or a value is invalid.
    pub fn load() -> Result<Self> {
        let config: Self = Self::figment().extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Layered configuration sources, lowest priority first.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""))
    }

    /// Worker engine configuration.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            worker_count: self.worker_pool_size,
            batch_size: self.worker_queue_size,
            export_batch_size: self.export_batch_size,
            poll_interval: Duration::from_secs(1),
            client_config: self.to_client_config(),
            retry_policy: self.to_retry_policy(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
            claim_lease: Duration::from_secs(self.job_lease_seconds),
        }
    }

    /// Destination HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.destination_timeout_seconds),
            ..ClientConfig::default()
        }
    }

    /// Job retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
        }
    }

    /// Database URL with the password masked, for logging.
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                let mut masked = self.database_url.clone();
                masked.replace_range(colon_pos + 1..at_pos, "***");
                return masked;
            }
        }
        self.database_url.clone()
    }

    /// Rejects values the worker cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be greater than 0");
        }

        if self.worker_pool_size == 0 {
            anyhow::bail!("worker_pool_size must be greater than 0");
        }

        if self.worker_queue_size == 0 {
            anyhow::bail!("worker_queue_size must be greater than 0");
        }

        if self.export_batch_size == 0 {
            anyhow::bail!("export_batch_size must be greater than 0");
        }

        if self.job_lease_seconds <= self.destination_timeout_seconds {
            anyhow::bail!("job_lease_seconds must exceed destination_timeout_seconds");
        }

        if self.max_retry_attempts == 0 {
            anyhow::bail!("max_retry_attempts must be greater than 0");
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            anyhow::bail!("retry_base_delay_ms cannot exceed retry_max_delay_ms");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        let hosts = [("posthog_host", &self.posthog_host), ("mixpanel_host", &self.mixpanel_host)];
        for (name, host) in hosts {
            if !host.starts_with("http://") && !host.starts_with("https://") {
                anyhow::bail!("{name} must be an http(s) URL, got {host:?}");
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |secret: &Option<String>| secret.as_ref().map(|_| "***");

        f.debug_struct("Config")
            .field("database_url", &self.database_url_masked())
            .field("database_max_connections", &self.database_max_connections)
            .field("worker_pool_size", &self.worker_pool_size)
            .field("worker_queue_size", &self.worker_queue_size)
            .field("shutdown_timeout_seconds", &self.shutdown_timeout_seconds)
            .field("job_lease_seconds", &self.job_lease_seconds)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field("retry_jitter_factor", &self.retry_jitter_factor)
            .field("destination_timeout_seconds", &self.destination_timeout_seconds)
            .field("export_batch_size", &self.export_batch_size)
            .field("posthog_api_key", &redact(&self.posthog_api_key))
            .field("posthog_host", &self.posthog_host)
            .field("mixpanel_token", &redact(&self.mixpanel_token))
            .field("mixpanel_host", &self.mixpanel_host)
            .field("rust_log", &self.rust_log)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            worker_pool_size: default_worker_count(),
            worker_queue_size: default_batch_size(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            job_lease_seconds: default_job_lease(),
            max_retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: default_jitter_factor(),
            destination_timeout_seconds: default_destination_timeout(),
            export_batch_size: default_export_batch_size(),
            posthog_api_key: None,
            posthog_host: default_posthog_host(),
            mixpanel_token: None,
            mixpanel_host: default_mixpanel_host(),
            rust_log: default_log_level(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/elasticdash".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_worker_count() -> usize {
    crate::DEFAULT_WORKER_COUNT
}

fn default_batch_size() -> usize {
    crate::DEFAULT_BATCH_SIZE
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_job_lease() -> u64 {
    crate::DEFAULT_CLAIM_LEASE_SECONDS
}

fn default_retry_attempts() -> u32 {
    crate::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    900_000
}

fn default_jitter_factor() -> f64 {
    0.25
}

fn default_destination_timeout() -> u64 {
    crate::DEFAULT_TIMEOUT_SECONDS
}

fn default_export_batch_size() -> usize {
    crate::DEFAULT_EXPORT_BATCH_SIZE
}

fn default_posthog_host() -> String {
    "https://us.i.posthog.com".to_string()
}

fn default_mixpanel_host() -> String {
    "https://api.mixpanel.com".to_string()
}

fn default_log_level() -> String {
    "info,elasticdash=debug".to_string()
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.posthog_host, "https://us.i.posthog.com");
        assert_eq!(config.mixpanel_host, "https://api.mixpanel.com");
        assert!(config.posthog_api_key.is_none());
    }

    #[test]
    fn environment_overrides_file_and_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                worker_pool_size = 8
                mixpanel_host = "https://api-eu.mixpanel.com"
                "#,
            )?;
            jail.set_env("WORKER_POOL_SIZE", "16");
            jail.set_env("POSTHOG_API_KEY", "phc_test");
            jail.set_env("MAX_RETRY_ATTEMPTS", "3");

            let config = Config::load().map_err(|e| e.to_string())?;

            assert_eq!(config.worker_pool_size, 16);
            assert_eq!(config.mixpanel_host, "https://api-eu.mixpanel.com");
            assert_eq!(config.posthog_api_key.as_deref(), Some("phc_test"));
            assert_eq!(config.to_retry_policy().max_attempts, 3);
            assert!(config.mixpanel_token.is_none());
            Ok(())
        });
    }

    #[test]
    fn invalid_values_fail_to_load() {
        Jail::expect_with(|jail| {
            jail.set_env("WORKER_POOL_SIZE", "0");

            assert!(Config::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.export_batch_size = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.retry_jitter_factor = 1.5;
        assert!(config.validate().is_err());

        config = Config::default();
        config.retry_base_delay_ms = config.retry_max_delay_ms + 1;
        assert!(config.validate().is_err());

        config = Config::default();
        config.job_lease_seconds = config.destination_timeout_seconds;
        assert!(config.validate().is_err());

        config = Config::default();
        config.posthog_host = "us.i.posthog.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn conversions_carry_values() {
        let config = Config {
            worker_pool_size: 6,
            worker_queue_size: 20,
            export_batch_size: 250,
            destination_timeout_seconds: 45,
            retry_base_delay_ms: 2_000,
            job_lease_seconds: 120,
            ..Config::default()
        };

        let engine = config.to_engine_config();

        assert_eq!(engine.worker_count, 6);
        assert_eq!(engine.batch_size, 20);
        assert_eq!(engine.export_batch_size, 250);
        assert_eq!(engine.client_config.timeout, Duration::from_secs(45));
        assert_eq!(engine.retry_policy.base_delay, Duration::from_secs(2));
        assert_eq!(engine.claim_lease, Duration::from_secs(120));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = Config {
            database_url: "postgresql://user:hunter2@db:5432/elasticdash".to_string(),
            mixpanel_token: Some("mp-secret".to_string()),
            ..Config::default()
        };

        let rendered = format!("{config:?}");

        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("mp-secret"));
        assert!(rendered.contains("user:***@db"));
    }
}
