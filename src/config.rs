//! Declarative limiter configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::distributed::{DistributedFixedWindow, DistributedLimiter, DistributedSlidingWindow};
use crate::error::{LimitError, Result};
use crate::ratelimit::{
    FixedWindowLimiter, KeyedLimiter, LeakyBucketLimiter, Limiter, SlidingWindowLimiter,
    TokenBucketLimiter,
};

/// Top-level configuration for a local limiter and its optional per-client quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// The limiter guarding the protected resource
    pub limiter: LimiterConfig,

    /// Per-client quota layered over `limiter`
    #[serde(default)]
    pub per_client: Option<PerClientConfig>,
}

/// Algorithm and parameters for a single-process limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterConfig {
    FixedWindow { window_ms: u64, max_count: u64 },
    SlidingWindow { window_ms: u64, max_count: usize },
    LeakyBucket { interval_ms: u64 },
    TokenBucket { capacity: usize, refill_interval_ms: u64 },
}

/// Per-client quota settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerClientConfig {
    /// Admissions allowed per client key per epoch
    #[serde(default = "default_max_per_key")]
    pub max_per_key: u64,

    /// Epoch length in milliseconds
    #[serde(default = "default_reset_interval_ms")]
    pub reset_interval_ms: u64,
}

impl Default for PerClientConfig {
    fn default() -> Self {
        Self {
            max_per_key: default_max_per_key(),
            reset_interval_ms: default_reset_interval_ms(),
        }
    }
}

fn default_max_per_key() -> u64 {
    100
}

fn default_reset_interval_ms() -> u64 {
    60_000
}

/// Which shared-store procedure a distributed limiter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributedAlgorithm {
    FixedWindow,
    SlidingWindow,
}

/// Settings for a Redis-backed limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedConfig {
    pub algorithm: DistributedAlgorithm,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    pub window_ms: u64,

    pub max_count: u64,

    /// Namespace for store keys
    #[serde(default)]
    pub key_prefix: Option<String>,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn nonzero(value: u64, field: &str) -> Result<Duration> {
    if value == 0 {
        return Err(LimitError::Config(format!("{} must be greater than zero", field)));
    }
    Ok(Duration::from_millis(value))
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LimitError::Config(format!("Failed to parse limiter config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no limiter can run with.
    pub fn validate(&self) -> Result<()> {
        self.limiter.validate()?;
        if let Some(per_client) = &self.per_client {
            nonzero(per_client.reset_interval_ms, "per_client.reset_interval_ms")?;
        }
        Ok(())
    }

    /// Build the configured limiter wrapped in a per-client quota.
    ///
    /// Uses the default quota when `per_client` is not configured.
    pub fn build_keyed(&self) -> Result<KeyedLimiter<Box<dyn Limiter>>> {
        let per_client = self.per_client.clone().unwrap_or_default();
        let reset_interval = nonzero(per_client.reset_interval_ms, "per_client.reset_interval_ms")?;
        Ok(KeyedLimiter::new(
            self.limiter.build()?,
            reset_interval,
            per_client.max_per_key,
        ))
    }
}

impl LimiterConfig {
    /// Reject zero-length windows and intervals.
    pub fn validate(&self) -> Result<()> {
        match *self {
            LimiterConfig::FixedWindow { window_ms, .. }
            | LimiterConfig::SlidingWindow { window_ms, .. } => {
                nonzero(window_ms, "window_ms")?;
            }
            LimiterConfig::LeakyBucket { interval_ms } => {
                nonzero(interval_ms, "interval_ms")?;
            }
            LimiterConfig::TokenBucket {
                refill_interval_ms, ..
            } => {
                nonzero(refill_interval_ms, "refill_interval_ms")?;
            }
        }
        Ok(())
    }

    /// Build the limiter.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(&self) -> Result<Box<dyn Limiter>> {
        self.validate()?;
        let limiter: Box<dyn Limiter> = match *self {
            LimiterConfig::FixedWindow {
                window_ms,
                max_count,
            } => Box::new(FixedWindowLimiter::new(
                Duration::from_millis(window_ms),
                max_count,
            )),
            LimiterConfig::SlidingWindow {
                window_ms,
                max_count,
            } => Box::new(SlidingWindowLimiter::new(
                Duration::from_millis(window_ms),
                max_count,
            )),
            LimiterConfig::LeakyBucket { interval_ms } => {
                Box::new(LeakyBucketLimiter::new(Duration::from_millis(interval_ms)))
            }
            LimiterConfig::TokenBucket {
                capacity,
                refill_interval_ms,
            } => Box::new(TokenBucketLimiter::new(
                capacity,
                Duration::from_millis(refill_interval_ms),
            )),
        };
        info!(config = ?self, "Limiter initialized");
        Ok(limiter)
    }
}

impl DistributedConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: DistributedConfig = serde_yaml::from_str(yaml).map_err(|e| {
            LimitError::Config(format!("Failed to parse distributed config: {}", e))
        })?;
        nonzero(config.window_ms, "window_ms")?;
        Ok(config)
    }

    /// Connect to Redis and build the configured limiter.
    pub async fn connect(&self) -> Result<Box<dyn DistributedLimiter>> {
        let window = nonzero(self.window_ms, "window_ms")?;
        let client = redis::Client::open(self.redis_url.as_str())?;
        let connection_manager = client.get_connection_manager().await?;
        info!(redis_url = %self.redis_url, algorithm = ?self.algorithm, "Connected to shared store");

        let limiter: Box<dyn DistributedLimiter> = match (self.algorithm, &self.key_prefix) {
            (DistributedAlgorithm::FixedWindow, Some(prefix)) => Box::new(
                DistributedFixedWindow::new(connection_manager, self.max_count, window)
                    .with_prefix(prefix.clone()),
            ),
            (DistributedAlgorithm::FixedWindow, None) => Box::new(DistributedFixedWindow::new(
                connection_manager,
                self.max_count,
                window,
            )),
            (DistributedAlgorithm::SlidingWindow, Some(prefix)) => Box::new(
                DistributedSlidingWindow::new(connection_manager, self.max_count, window)
                    .with_prefix(prefix.clone()),
            ),
            (DistributedAlgorithm::SlidingWindow, None) => Box::new(
                DistributedSlidingWindow::new(connection_manager, self.max_count, window),
            ),
        };
        Ok(limiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn test_parse_fixed_window() {
        let yaml = r#"
limiter:
  algorithm: fixed_window
  window_ms: 100
  max_count: 3
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.limiter,
            LimiterConfig::FixedWindow {
                window_ms: 100,
                max_count: 3
            }
        );
        assert!(config.per_client.is_none());
    }

    #[test]
    fn test_parse_per_client_defaults() {
        let yaml = r#"
limiter:
  algorithm: token_bucket
  capacity: 10
  refill_interval_ms: 50
per_client:
  max_per_key: 5
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        let per_client = config.per_client.unwrap();
        assert_eq!(per_client.max_per_key, 5);
        assert_eq!(per_client.reset_interval_ms, 60_000);
    }

    #[test]
    fn test_reject_zero_interval() {
        let yaml = r#"
limiter:
  algorithm: leaky_bucket
  interval_ms: 0
"#;
        let err = TurnstileConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, LimitError::Config(_)));
    }

    #[test]
    fn test_reject_unknown_algorithm() {
        let yaml = r#"
limiter:
  algorithm: gcra
  window_ms: 10
"#;
        assert!(matches!(
            TurnstileConfig::from_yaml(yaml),
            Err(LimitError::Config(_))
        ));
    }

    #[test]
    fn test_parse_distributed() {
        let yaml = r#"
algorithm: sliding_window
window_ms: 1000
max_count: 2
key_prefix: turnstile
"#;
        let config = DistributedConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.algorithm, DistributedAlgorithm::SlidingWindow);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.key_prefix.as_deref(), Some("turnstile"));
    }

    #[test]
    fn test_missing_file() {
        let err = TurnstileConfig::from_file("/nonexistent/turnstile.yaml").unwrap_err();
        assert!(matches!(err, LimitError::Io(_)));
    }

    #[tokio::test]
    async fn test_build_keyed_from_config() {
        let yaml = r#"
limiter:
  algorithm: sliding_window
  window_ms: 1000
  max_count: 100
per_client:
  max_per_key: 2
  reset_interval_ms: 60000
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        let limiter = config.build_keyed().unwrap();
        let ctx = Context::background();

        assert!(limiter.allow_for(&ctx, "1.2.3.4").await.is_ok());
        assert!(limiter.allow_for(&ctx, "1.2.3.4").await.is_ok());
        assert!(limiter.allow_for(&ctx, "1.2.3.4").await.is_err());
        assert!(limiter.allow_for(&ctx, "5.6.7.8").await.is_ok());
        limiter.close();
    }

    #[tokio::test]
    async fn test_build_each_algorithm() {
        let configs = [
            LimiterConfig::FixedWindow {
                window_ms: 1000,
                max_count: 1,
            },
            LimiterConfig::SlidingWindow {
                window_ms: 1000,
                max_count: 1,
            },
            LimiterConfig::TokenBucket {
                capacity: 1,
                refill_interval_ms: 1,
            },
            LimiterConfig::LeakyBucket { interval_ms: 1 },
        ];
        for config in configs {
            let limiter = config.build().unwrap();
            limiter.close();
            limiter.close();
        }
    }
}
