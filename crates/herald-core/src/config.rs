//! Pipeline configuration.
//!
//! Every setting has a default and can be overridden from the environment:
//!
//! | variable | default |
//! |---|---|
//! | `HERALD_QUEUE_DIR` | unset (in-memory queue) |
//! | `HERALD_MAX_RETRIES` | 3 |
//! | `HERALD_BACKOFF_BASE_MS` | 30000 |
//! | `HERALD_BACKOFF_CAP_MS` | 1800000 |
//! | `HERALD_SCAN_INTERVAL_SECS` | 60 |
//! | `HERALD_WORKERS` | 4 |
//! | `HERALD_LEASE_TIMEOUT_SECS` | 300 |
//! | `HERALD_HANDLER_TIMEOUT_SECS` | 120 |
//! | `HERALD_ADAPTER_TIMEOUT_SECS` | 30 |
//! | `HERALD_REAPER_INTERVAL_SECS` | 30 |
//! | `HERALD_RETENTION_SECS` | 86400 |
//! | `HERALD_HOUSEKEEPING_INTERVAL_SECS` | 600 |
//! | `HERALD_POLL_MIN_MS` | 100 |
//! | `HERALD_POLL_MAX_MS` | 5000 |

use std::path::PathBuf;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Serialized};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::queue::RetryPolicy;

/// Every field maps to `HERALD_<FIELD>` (e.g. `workers` -> `HERALD_WORKERS`).
pub const ENV_PREFIX: &str = "HERALD_";

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 30_000;
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 30 * 60 * 1000;
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_ADAPTER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_RETENTION_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_HOUSEKEEPING_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_POLL_MIN_MS: u64 = 100;
pub const DEFAULT_POLL_MAX_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory for the durable job store. `None` keeps jobs in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_dir: Option<PathBuf>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Worker pool size for the content queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    /// How long completed/dead jobs are kept.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_housekeeping_interval_secs")]
    pub housekeeping_interval_secs: u64,
    #[serde(default = "default_poll_min_ms")]
    pub poll_min_ms: u64,
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_backoff_base_ms() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}
fn default_backoff_cap_ms() -> u64 {
    DEFAULT_BACKOFF_CAP_MS
}
fn default_scan_interval_secs() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}
fn default_workers() -> usize {
    DEFAULT_WORKERS
}
fn default_lease_timeout_secs() -> u64 {
    DEFAULT_LEASE_TIMEOUT_SECS
}
fn default_handler_timeout_secs() -> u64 {
    DEFAULT_HANDLER_TIMEOUT_SECS
}
fn default_adapter_timeout_secs() -> u64 {
    DEFAULT_ADAPTER_TIMEOUT_SECS
}
fn default_reaper_interval_secs() -> u64 {
    DEFAULT_REAPER_INTERVAL_SECS
}
fn default_retention_secs() -> u64 {
    DEFAULT_RETENTION_SECS
}
fn default_housekeeping_interval_secs() -> u64 {
    DEFAULT_HOUSEKEEPING_INTERVAL_SECS
}
fn default_poll_min_ms() -> u64 {
    DEFAULT_POLL_MIN_MS
}
fn default_poll_max_ms() -> u64 {
    DEFAULT_POLL_MAX_MS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_dir: None,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            workers: DEFAULT_WORKERS,
            lease_timeout_secs: DEFAULT_LEASE_TIMEOUT_SECS,
            handler_timeout_secs: DEFAULT_HANDLER_TIMEOUT_SECS,
            adapter_timeout_secs: DEFAULT_ADAPTER_TIMEOUT_SECS,
            reaper_interval_secs: DEFAULT_REAPER_INTERVAL_SECS,
            retention_secs: DEFAULT_RETENTION_SECS,
            housekeeping_interval_secs: DEFAULT_HOUSEKEEPING_INTERVAL_SECS,
            poll_min_ms: DEFAULT_POLL_MIN_MS,
            poll_max_ms: DEFAULT_POLL_MAX_MS,
        }
    }
}

impl PipelineConfig {
    /// Read `HERALD_*` variables from the process environment over the
    /// built-in defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_over(Self::default())
    }

    /// Same as `from_env`, with `base` supplying every unset value.
    /// Validates the result.
    pub fn from_env_over(base: PipelineConfig) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(base))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// `adapter_timeout < handler_timeout <= lease_timeout`, so a hung adapter
    /// is caught by the handler before the lease has to be reclaimed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let inconsistent = |msg: String| Err(ConfigError::Inconsistent(msg));

        if self.workers == 0 {
            return inconsistent("workers must be at least 1".into());
        }
        if self.max_retries == 0 {
            return inconsistent("max_retries must be at least 1".into());
        }
        if self.adapter_timeout_secs >= self.handler_timeout_secs {
            return inconsistent(format!(
                "adapter timeout ({}s) must be shorter than handler timeout ({}s)",
                self.adapter_timeout_secs, self.handler_timeout_secs
            ));
        }
        if self.handler_timeout_secs > self.lease_timeout_secs {
            return inconsistent(format!(
                "handler timeout ({}s) must not exceed lease timeout ({}s)",
                self.handler_timeout_secs, self.lease_timeout_secs
            ));
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            return inconsistent(format!(
                "backoff base ({}ms) exceeds cap ({}ms)",
                self.backoff_base_ms, self.backoff_cap_ms
            ));
        }
        if self.poll_min_ms == 0 || self.poll_min_ms > self.poll_max_ms {
            return inconsistent(format!(
                "poll interval range {}..{}ms is empty",
                self.poll_min_ms, self.poll_max_ms
            ));
        }
        for (name, secs) in [
            ("scan interval", self.scan_interval_secs),
            ("reaper interval", self.reaper_interval_secs),
            ("housekeeping interval", self.housekeeping_interval_secs),
        ] {
            if secs == 0 {
                return inconsistent(format!("{name} must be positive"));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
        )
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs)
    }

    pub fn poll_min(&self) -> Duration {
        Duration::from_millis(self.poll_min_ms)
    }

    pub fn poll_max(&self) -> Duration {
        Duration::from_millis(self.poll_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn defaults_when_nothing_is_set() {
        Jail::expect_with(|_| {
            let config = PipelineConfig::from_env().unwrap();
            assert_eq!(config, PipelineConfig::default());
            assert_eq!(config.retry_policy().next_delay(1), Duration::from_secs(60));
            Ok(())
        });
    }

    #[test]
    fn overrides_are_applied() {
        Jail::expect_with(|jail| {
            jail.set_env("HERALD_QUEUE_DIR", "/var/lib/herald");
            jail.set_env("HERALD_WORKERS", "8");
            jail.set_env("HERALD_MAX_RETRIES", "5");
            jail.set_env("HERALD_SCAN_INTERVAL_SECS", "120");

            let config = PipelineConfig::from_env().unwrap();
            assert_eq!(config.queue_dir, Some(PathBuf::from("/var/lib/herald")));
            assert_eq!(config.workers, 8);
            assert_eq!(config.max_retries, 5);
            assert_eq!(config.scan_interval(), Duration::from_secs(120));
            Ok(())
        });
    }

    #[test]
    fn environment_wins_over_the_base() {
        Jail::expect_with(|jail| {
            jail.set_env("HERALD_WORKERS", "3");
            let base = PipelineConfig {
                workers: 1,
                scan_interval_secs: 1,
                ..PipelineConfig::default()
            };

            let config = PipelineConfig::from_env_over(base).unwrap();
            assert_eq!(config.workers, 3);
            assert_eq!(config.scan_interval_secs, 1);
            Ok(())
        });
    }

    #[test]
    fn unparseable_value_names_the_field() {
        Jail::expect_with(|jail| {
            jail.set_env("HERALD_WORKERS", "many");
            let err = PipelineConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::Load(_)));
            assert!(err.to_string().contains("workers"), "{err}");
            Ok(())
        });
    }

    #[rstest]
    #[case::adapter_not_shorter(&[("HERALD_ADAPTER_TIMEOUT_SECS", "120")])]
    #[case::handler_exceeds_lease(&[("HERALD_HANDLER_TIMEOUT_SECS", "301")])]
    #[case::no_workers(&[("HERALD_WORKERS", "0")])]
    #[case::no_retries(&[("HERALD_MAX_RETRIES", "0")])]
    #[case::base_over_cap(&[("HERALD_BACKOFF_BASE_MS", "10"), ("HERALD_BACKOFF_CAP_MS", "5")])]
    #[case::zero_scan(&[("HERALD_SCAN_INTERVAL_SECS", "0")])]
    fn inconsistent_settings_are_rejected(#[case] pairs: &[(&str, &str)]) {
        Jail::expect_with(|jail| {
            for (key, value) in pairs {
                jail.set_env(key, value);
            }
            let err = PipelineConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::Inconsistent(_)), "{err}");
            Ok(())
        });
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"workers": 2}"#).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    }
}
