//! Runtime configuration.
//!
//! Defaults cover every field, so an empty JSON object or an empty
//! environment both yield a usable config. `NETRT_*` environment variables
//! override individual fields.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads of the internal async executor.
    pub worker_threads: usize,
    /// HTTP timeout used when a client's timeout is unset or zero.
    pub default_timeout_secs: u64,
    /// Upper bound for each signaling round-trip.
    pub signaling_timeout_secs: u64,
    /// How long a forced shutdown waits for aborted operations to unwind.
    pub shutdown_grace_ms: u64,
    pub max_handles: usize,
    /// Pacing interval of file-backed media streams.
    pub frame_interval_ms: u64,
    pub frame_chunk_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            default_timeout_secs: 30,
            signaling_timeout_secs: 10,
            shutdown_grace_ms: 2000,
            max_handles: 4096,
            frame_interval_ms: 42,
            frame_chunk_bytes: 64 * 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `NETRT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = RuntimeConfig::default();
        override_field(&lookup, "NETRT_WORKER_THREADS", &mut config.worker_threads)?;
        override_field(&lookup, "NETRT_DEFAULT_TIMEOUT_SECS", &mut config.default_timeout_secs)?;
        override_field(&lookup, "NETRT_SIGNALING_TIMEOUT_SECS", &mut config.signaling_timeout_secs)?;
        override_field(&lookup, "NETRT_SHUTDOWN_GRACE_MS", &mut config.shutdown_grace_ms)?;
        override_field(&lookup, "NETRT_MAX_HANDLES", &mut config.max_handles)?;
        override_field(&lookup, "NETRT_FRAME_INTERVAL_MS", &mut config.frame_interval_ms)?;
        override_field(&lookup, "NETRT_FRAME_CHUNK_BYTES", &mut config.frame_chunk_bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Zero("worker_threads"));
        }
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::Zero("default_timeout_secs"));
        }
        if self.signaling_timeout_secs == 0 {
            return Err(ConfigError::Zero("signaling_timeout_secs"));
        }
        if self.max_handles == 0 {
            return Err(ConfigError::Zero("max_handles"));
        }
        if self.frame_chunk_bytes == 0 {
            return Err(ConfigError::Zero("frame_chunk_bytes"));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn signaling_timeout(&self) -> Duration {
        Duration::from_secs(self.signaling_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

fn override_field<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    field: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(key) {
        *field = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { key, value: raw.clone() })?;
    }
    Ok(())
}
