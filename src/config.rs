//! Configuration structures for the DoIf and Throttle engines.
//!
//! Plain `serde` structs loaded via `toml`, following the same
//! `Config::load()` convention used elsewhere in this crate's ambient code:
//! defaults via `impl Default`, durations given as human-readable strings
//! (`"100ms"`, `"2s"`) and parsed with `humantime` rather than a bespoke
//! parser. Configuration is loaded once at pipeline start; there is no
//! file-watching or hot reload.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Recursive predicate configuration. Field-op and logical nodes are
/// distinguished structurally (`values` vs. `operands`) rather than by an
/// explicit tag, matching the external interface described for this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DoIfConfig {
    FieldOp {
        op: String,
        field: String,
        values: Vec<String>,
        #[serde(default = "default_case_sensitive")]
        case_sensitive: bool,
    },
    Logical {
        op: String,
        operands: Vec<DoIfConfig>,
    },
}

fn default_case_sensitive() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Count,
    Size,
}

impl Default for LimitKind {
    fn default() -> Self {
        LimitKind::Count
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub limit: i64,
    #[serde(default)]
    pub limit_kind: Option<LimitKind>,
    #[serde(default)]
    pub conditions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexRatio {
    pub ratio: f64,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitDistributionConfig {
    pub field: String,
    #[serde(default)]
    pub ratios: Vec<ComplexRatio>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterBackend {
    Memory,
    Redis,
}

impl Default for LimiterBackend {
    fn default() -> Self {
        LimiterBackend::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisBackendConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub limiter_key_field: Option<String>,
    #[serde(default)]
    pub limiter_value_field: Option<String>,
}

fn default_sync_interval() -> String {
    "5s".to_string()
}

fn default_worker_count() -> usize {
    1
}

impl Default for RedisBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            password: None,
            sync_interval: default_sync_interval(),
            worker_count: default_worker_count(),
            limiter_key_field: None,
            limiter_value_field: None,
        }
    }
}

impl RedisBackendConfig {
    pub fn sync_interval(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.sync_interval).map_err(|e| ConfigError::InvalidRule {
            reason: format!("redis_backend_cfg.sync_interval {:?}: {e}", self.sync_interval),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub throttle_field: String,
    #[serde(default)]
    pub time_field: String,
    pub default_limit: i64,
    #[serde(default)]
    pub limit_kind: LimitKind,
    #[serde(default = "default_buckets_count")]
    pub buckets_count: usize,
    #[serde(default = "default_bucket_interval")]
    pub bucket_interval: String,
    #[serde(default = "default_limiter_expiration")]
    pub limiter_expiration: String,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub limit_distribution: Option<LimitDistributionConfig>,
    #[serde(default)]
    pub limiter_backend: LimiterBackend,
    #[serde(default)]
    pub redis_backend_cfg: RedisBackendConfig,
}

fn default_buckets_count() -> usize {
    60
}

fn default_bucket_interval() -> String {
    "1s".to_string()
}

fn default_limiter_expiration() -> String {
    "30m".to_string()
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            throttle_field: String::new(),
            time_field: String::new(),
            default_limit: -1,
            limit_kind: LimitKind::default(),
            buckets_count: default_buckets_count(),
            bucket_interval: default_bucket_interval(),
            limiter_expiration: default_limiter_expiration(),
            rules: Vec::new(),
            limit_distribution: None,
            limiter_backend: LimiterBackend::default(),
            redis_backend_cfg: RedisBackendConfig::default(),
        }
    }
}

impl ThrottleConfig {
    pub fn bucket_interval(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.bucket_interval).map_err(|e| ConfigError::InvalidRule {
            reason: format!("bucket_interval {:?}: {e}", self.bucket_interval),
        })
    }

    pub fn limiter_expiration(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.limiter_expiration).map_err(|e| ConfigError::InvalidRule {
            reason: format!("limiter_expiration {:?}: {e}", self.limiter_expiration),
        })
    }
}

/// Top-level configuration for the demo binary: one DoIf predicate guarding
/// one Throttle rule set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub pipeline: String,
    pub do_if: Option<DoIfConfig>,
    pub throttle: Option<ThrottleConfig>,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self {
                pipeline: "demo".to_string(),
                ..Default::default()
            };
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(path, contents)?;
            Ok(default_config)
        }
    }
}
