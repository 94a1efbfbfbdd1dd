//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix of the environment variables read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "TASKFLEET_";

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sweep period in milliseconds.
    pub poll_interval_ms: u64,
    /// Concurrent jobs allowed per account.
    pub account_concurrency_cap: u32,
    /// Job timeout when the task category sets none.
    pub default_job_timeout_secs: u64,
    /// Consecutive fires without any dispatched job before a task fails.
    pub max_allocation_failures: u32,
    /// Tasks processed concurrently by one sweep.
    pub sweep_workers: usize,
    /// Maximum messages waiting in one area queue.
    pub area_queue_max_depth: usize,
    /// Audit events kept by the in-memory sink.
    pub audit_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            account_concurrency_cap: 1,
            default_job_timeout_secs: 600,
            max_allocation_failures: 3,
            sweep_workers: num_cpus::get().max(1),
            area_queue_max_depth: 1_024,
            audit_buffer: 4_096,
        }
    }
}

impl EngineConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.account_concurrency_cap == 0 {
            return Err("account_concurrency_cap must be greater than 0".into());
        }
        if self.default_job_timeout_secs == 0 {
            return Err("default_job_timeout_secs must be greater than 0".into());
        }
        if self.max_allocation_failures == 0 {
            return Err("max_allocation_failures must be greater than 0".into());
        }
        if self.sweep_workers == 0 {
            return Err("sweep_workers must be greater than 0".into());
        }
        if self.area_queue_max_depth == 0 {
            return Err("area_queue_max_depth must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields take defaults.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from defaults overridden by `TASKFLEET_*` variables.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from defaults overridden through `lookup`, which is
    /// asked for each `TASKFLEET_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        override_with(&lookup, "POLL_INTERVAL_MS", &mut cfg.poll_interval_ms)?;
        override_with(&lookup, "ACCOUNT_CONCURRENCY_CAP", &mut cfg.account_concurrency_cap)?;
        override_with(&lookup, "DEFAULT_JOB_TIMEOUT_SECS", &mut cfg.default_job_timeout_secs)?;
        override_with(&lookup, "MAX_ALLOCATION_FAILURES", &mut cfg.max_allocation_failures)?;
        override_with(&lookup, "SWEEP_WORKERS", &mut cfg.sweep_workers)?;
        override_with(&lookup, "AREA_QUEUE_MAX_DEPTH", &mut cfg.area_queue_max_depth)?;
        override_with(&lookup, "AUDIT_BUFFER", &mut cfg.audit_buffer)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Sweep period.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Job timeout, preferring a category override.
    pub fn job_timeout(&self, category_secs: Option<u64>) -> Duration {
        Duration::from_secs(
            category_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(self.default_job_timeout_secs),
        )
    }
}

fn override_with<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), String>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let name = format!("{ENV_PREFIX}{key}");
    if let Some(raw) = lookup(&name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| format!("{name}: invalid value `{raw}`: {e}"))?;
    }
    Ok(())
}
