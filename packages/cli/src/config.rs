// ABOUTME: Environment-driven configuration for the coderun binary
// ABOUTME: Maps CODERUN_* variables onto storage, sandbox, queue and worker settings

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use coderun_queue::{QueueSettings, RetryPolicy};
use coderun_sandbox::SandboxSettings;
use coderun_storage::StorageConfig;
use coderun_worker::WorkerSettings;
use thiserror::Error;

/// Extra lease time on top of the execution timeout, covering container
/// start-up and teardown
pub const LEASE_GRACE: Duration = Duration::from_secs(30);

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("{name} must be greater than zero")]
    MustBePositive { name: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_path: PathBuf,
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    pub execution_timeout: Duration,
    pub max_output_bytes: usize,
    pub memory_mb: u64,
    pub cpus: f64,
    pub pids_limit: i64,
    pub job_attempts: u32,
    pub job_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let sandbox = SandboxSettings::default();
        let retry = RetryPolicy::default();
        let worker = WorkerSettings::default();

        Self {
            database_path: StorageConfig::default().path,
            worker_concurrency: worker.concurrency,
            poll_interval: worker.poll_interval,
            execution_timeout: sandbox.timeout,
            max_output_bytes: sandbox.max_output_bytes,
            memory_mb: sandbox.memory_mb,
            cpus: sandbox.cpus,
            pids_limit: sandbox.pids_limit,
            job_attempts: retry.attempts,
            job_backoff: retry.backoff_base,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_path = lookup("CODERUN_DATABASE_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let config = Config {
            database_path,
            worker_concurrency: parse_or(
                &lookup,
                "CODERUN_WORKER_CONCURRENCY",
                defaults.worker_concurrency,
            )?,
            poll_interval: millis_or(&lookup, "CODERUN_POLL_INTERVAL_MS", defaults.poll_interval)?,
            execution_timeout: millis_or(
                &lookup,
                "CODERUN_EXECUTION_TIMEOUT_MS",
                defaults.execution_timeout,
            )?,
            max_output_bytes: parse_or(
                &lookup,
                "CODERUN_MAX_OUTPUT_BYTES",
                defaults.max_output_bytes,
            )?,
            memory_mb: parse_or(&lookup, "CODERUN_MEMORY_MB", defaults.memory_mb)?,
            cpus: parse_or(&lookup, "CODERUN_CPUS", defaults.cpus)?,
            pids_limit: parse_or(&lookup, "CODERUN_PIDS_LIMIT", defaults.pids_limit)?,
            job_attempts: parse_or(&lookup, "CODERUN_JOB_ATTEMPTS", defaults.job_attempts)?,
            job_backoff: millis_or(&lookup, "CODERUN_JOB_BACKOFF_MS", defaults.job_backoff)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool); 7] = [
            ("CODERUN_WORKER_CONCURRENCY", self.worker_concurrency > 0),
            ("CODERUN_EXECUTION_TIMEOUT_MS", !self.execution_timeout.is_zero()),
            ("CODERUN_MAX_OUTPUT_BYTES", self.max_output_bytes > 0),
            ("CODERUN_MEMORY_MB", self.memory_mb > 0),
            ("CODERUN_CPUS", self.cpus > 0.0 && self.cpus.is_finite()),
            ("CODERUN_PIDS_LIMIT", self.pids_limit > 0),
            ("CODERUN_JOB_ATTEMPTS", self.job_attempts > 0),
        ];

        match checks.iter().find(|(_, ok)| !*ok) {
            Some((name, _)) => Err(ConfigError::MustBePositive { name: *name }),
            None => Ok(()),
        }
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::new(&self.database_path)
    }

    pub fn sandbox_settings(&self) -> SandboxSettings {
        SandboxSettings {
            memory_mb: self.memory_mb,
            cpus: self.cpus,
            pids_limit: self.pids_limit,
            timeout: self.execution_timeout,
            max_output_bytes: self.max_output_bytes,
            ..Default::default()
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            retry: RetryPolicy {
                attempts: self.job_attempts,
                backoff_base: self.job_backoff,
            },
            lease_duration: self.execution_timeout.saturating_add(LEASE_GRACE),
            ..Default::default()
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            concurrency: self.worker_concurrency,
            poll_interval: self.poll_interval,
            ..Default::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw.clone() }),
        _ => Ok(default),
    }
}

fn millis_or<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = default.as_millis() as u64;
    parse_or(lookup, name, default_ms).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = from_vars(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.database_path, PathBuf::from("coderun.db"));
        assert_eq!(config.execution_timeout, Duration::from_secs(30));
        assert_eq!(config.job_attempts, 3);
        assert_eq!(config.job_backoff, Duration::from_secs(2));
    }

    #[test]
    fn test_overrides() {
        let config = from_vars(&[
            ("CODERUN_DATABASE_PATH", "/var/lib/coderun/runs.db"),
            ("CODERUN_WORKER_CONCURRENCY", "8"),
            ("CODERUN_EXECUTION_TIMEOUT_MS", "5000"),
            ("CODERUN_CPUS", "1.5"),
            ("CODERUN_JOB_BACKOFF_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/coderun/runs.db"));
        assert_eq!(config.worker_concurrency, 8);
        assert_eq!(config.execution_timeout, Duration::from_secs(5));
        assert_eq!(config.cpus, 1.5);
        assert_eq!(config.job_backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config =
            from_vars(&[("CODERUN_MEMORY_MB", "  "), ("CODERUN_DATABASE_PATH", "")]).unwrap();
        assert_eq!(config.memory_mb, 128);
        assert_eq!(config.database_path, PathBuf::from("coderun.db"));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = from_vars(&[("CODERUN_PIDS_LIMIT", "lots")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                name: "CODERUN_PIDS_LIMIT",
                value: "lots".to_string()
            }
        );
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        let err = from_vars(&[("CODERUN_JOB_ATTEMPTS", "0")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MustBePositive {
                name: "CODERUN_JOB_ATTEMPTS"
            }
        );
    }

    #[test]
    fn test_lease_outlasts_execution_timeout() {
        let config = from_vars(&[("CODERUN_EXECUTION_TIMEOUT_MS", "10000")]).unwrap();
        let queue = config.queue_settings();
        assert_eq!(queue.lease_duration, Duration::from_secs(40));
        assert_eq!(queue.retry.attempts, 3);

        let sandbox = config.sandbox_settings();
        assert_eq!(sandbox.timeout, Duration::from_secs(10));
        assert_eq!(sandbox.max_output_bytes, 1024 * 1024);
    }
}
