//! Configuration
//!
//! - backend 用の設定マップ（`{"backend": "...", ...}`）→ `QueueConfig` / `CacheConfig`
//! - プロセス全体の設定ファイル + 環境変数 → `CourierConfig`
//!
//! 未知のキーは無視し、必須キーの欠落・不正値は `CourierError::Configuration`。

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{CourierError, Result};

const DEFAULT_KEY_PREFIX: &str = "courier:task:";
const DEFAULT_SERVICE_NAME: &str = "mymaster";

/// Queue backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum QueueConfig {
    /// In-process reference backend.
    Dummy {},
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::Dummy {}
    }
}

/// Result cache selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum CacheConfig {
    Dummy {},
    Redis {
        address: String,
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
    },
    RedisSentinel {
        sentinels: Vec<(String, u16)>,
        #[serde(default = "default_service_name")]
        service_name: String,
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
    },
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::Dummy {}
    }
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

impl QueueConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| CourierError::config(format!("queue backend: {e}")))
    }
}

impl CacheConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|e| CourierError::config(format!("result cache: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Dummy {} => Ok(()),
            Self::Redis { address, .. } if address.trim().is_empty() => {
                Err(CourierError::config("result cache: `address` must not be empty"))
            }
            Self::Redis { .. } => Ok(()),
            Self::RedisSentinel { sentinels, .. } if sentinels.is_empty() => Err(
                CourierError::config("result cache: `sentinels` needs at least one (host, port)"),
            ),
            Self::RedisSentinel { service_name, .. } if service_name.trim().is_empty() => {
                Err(CourierError::config("result cache: `service_name` must not be empty"))
            }
            Self::RedisSentinel { .. } => Ok(()),
        }
    }
}

/// Worker loop tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep between polling cycles.
    pub poll_interval_ms: u64,
    /// Number of worker loops sharing one backend.
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            concurrency: 1,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(CourierError::config("worker: `poll_interval_ms` must be positive"));
        }
        if self.concurrency == 0 {
            return Err(CourierError::config("worker: `concurrency` must be at least 1"));
        }
        Ok(())
    }
}

/// Process-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub queue: QueueConfig,
    pub cache: CacheConfig,
    pub worker: WorkerConfig,
}

impl CourierConfig {
    /// Load from a file (TOML / YAML / JSON by extension), layered with
    /// `COURIER__SECTION__KEY` environment variables.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("COURIER").separator("__"))
            .build()
            .map_err(|e| CourierError::config(format!("failed to load {}: {e}", path.display())))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| CourierError::config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.worker.validate()
    }
}
