//! # Config — TOML Service Configuration
//!
//! Optional file loaded via `--config` / `SITECLOCK_CONFIG`. Every field has a
//! default, so an empty file (or no file) is a valid configuration. Connection
//! strings stay on the CLI/env side; this file only carries tuning.
//!
//! ```toml
//! [detection]
//! detector_url = "http://localhost:8500/detect"
//! confidence = 0.3
//! iou = 0.45
//! workers = 2
//! policy = { kind = "negative_prefix", prefix = "not_" }
//!
//! [promotion]
//! threshold_hours = 24
//! run_hour_utc = 0
//!
//! [server]
//! body_limit_bytes = 10485760
//! request_timeout_secs = 30
//! cors_origins = ["https://ops.example.com"]
//! ```

use anyhow::{ensure, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub promotion: PromotionConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Inference endpoint. Unset means every job fails with "no detector configured".
    pub detector_url: Option<String>,
    pub confidence: f64,
    pub iou: f64,
    pub timeout_secs: u64,
    /// Runner tasks per process.
    pub workers: usize,
    /// Queue poll interval for idle workers.
    pub poll_interval_ms: u64,
    /// How long one poller may hold a handle while resolving it.
    pub resolve_lock_ms: u64,
    pub policy: PolicyConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            detector_url: None,
            confidence: 0.3,
            iou: 0.45,
            timeout_secs: 30,
            workers: 2,
            poll_interval_ms: 250,
            resolve_lock_ms: 30_000,
            policy: PolicyConfig::default(),
        }
    }
}

/// Which approval predicate the runner applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// Reject when any label starts with `prefix`; approve otherwise.
    NegativePrefix { prefix: String },
    /// Approve only when every listed label was detected.
    RequiredLabels { labels: Vec<String> },
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig::NegativePrefix {
            prefix: "not_".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    pub threshold_hours: i64,
    pub run_hour_utc: u32,
}

/// Longest accepted promotion threshold: ten years.
pub const MAX_THRESHOLD_HOURS: i64 = 24 * 365 * 10;

impl PromotionConfig {
    /// `None` when `threshold_hours` is negative or above [`MAX_THRESHOLD_HOURS`].
    pub fn threshold(&self) -> Option<Duration> {
        if !(0..=MAX_THRESHOLD_HOURS).contains(&self.threshold_hours) {
            return None;
        }
        Duration::try_hours(self.threshold_hours)
    }
}

impl Default for PromotionConfig {
    fn default() -> Self {
        PromotionConfig {
            threshold_hours: 24,
            run_hour_utc: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub body_limit_bytes: usize,
    pub request_timeout_secs: u64,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            body_limit_bytes: 10 * 1024 * 1024,
            request_timeout_secs: 30,
            cors_origins: Vec::new(),
        }
    }
}

pub fn parse_toml(source: &str) -> Result<Config> {
    let config: Config = toml::from_str(source).context("invalid configuration TOML")?;
    ensure!(
        config.promotion.threshold().is_some(),
        "promotion.threshold_hours must be between 0 and {}, got {}",
        MAX_THRESHOLD_HOURS,
        config.promotion.threshold_hours
    );
    ensure!(
        config.promotion.run_hour_utc < 24,
        "promotion.run_hour_utc must be below 24, got {}",
        config.promotion.run_hour_utc
    );
    Ok(config)
}

/// Load from `path`, or defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => {
            let source = std::fs::read_to_string(p)
                .with_context(|| format!("reading config {}", p.display()))?;
            parse_toml(&source)
        }
        None => Ok(Config::default()),
    }
}
