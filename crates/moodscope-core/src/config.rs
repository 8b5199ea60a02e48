//! Deployment-injected configuration.
//!
//! Everything here arrives from the surrounding deployment layer (YAML file
//! or defaults); the core never discovers infrastructure on its own.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use moodscope_cache::CacheConfig;
use moodscope_model::ModelConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Upper bound on texts per model call.
    pub max_batch_size: usize,
    /// Batches admitted to the model runner at once. 1 serializes the
    /// accelerator context; raise only for backends that tolerate
    /// concurrent batches.
    pub max_concurrent_batches: usize,
    /// Per-request deadline covering cache lookups, inference and
    /// aggregation.
    pub request_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 16,
            max_concurrent_batches: 1,
            request_timeout_secs: 30,
        }
    }
}

/// Weights of the composite quality score. The combination is monotonic in
/// each component and normalized by the weight sum, so any non-negative
/// weighting stays within [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub sentiment_weight: f32,
    pub valence_weight: f32,
    pub engagement_weight: f32,
    /// Message count at which the engagement signal reaches one half;
    /// the signal saturates as n / (n + saturation).
    pub engagement_saturation: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            sentiment_weight: 0.4,
            valence_weight: 0.3,
            engagement_weight: 0.3,
            engagement_saturation: 8.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub batch: BatchConfig,
    pub cache: CacheConfig,
    pub quality: QualityConfig,
}

impl AppConfig {
    /// Load from a YAML file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.max_batch_size == 0 {
            bail!("batch.max_batch_size must be at least 1");
        }
        if self.batch.max_concurrent_batches == 0 {
            bail!("batch.max_concurrent_batches must be at least 1");
        }
        if self.batch.request_timeout_secs == 0 {
            bail!("batch.request_timeout_secs must be at least 1");
        }
        let q = &self.quality;
        for (name, weight) in [
            ("sentiment_weight", q.sentiment_weight),
            ("valence_weight", q.valence_weight),
            ("engagement_weight", q.engagement_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                bail!("quality.{name} must be a non-negative number");
            }
        }
        if q.sentiment_weight + q.valence_weight + q.engagement_weight <= 0.0 {
            bail!("quality weights must not all be zero");
        }
        if !q.engagement_saturation.is_finite() || q.engagement_saturation <= 0.0 {
            bail!("quality.engagement_saturation must be positive");
        }
        Ok(())
    }
}
