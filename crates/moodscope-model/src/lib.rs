pub mod candle;
pub mod device;
pub mod lexicon;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use moodscope_schema::{EmotionResult, ModelsInfo, SentimentResult};

pub use candle::CandleClassifier;
pub use device::{device_label, select_device, DevicePreference};
pub use lexicon::LexiconClassifier;

/// Tolerance for the sum-to-1 check on emotion distributions.
pub const DISTRIBUTION_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Error)]
pub enum ModelError {
    /// Weights or tokenizer could not be loaded. Fatal for warm-up.
    #[error("model weights unavailable: {message}")]
    WeightsUnavailable { message: String },
    #[error("tokenizer error: {message}")]
    Tokenizer { message: String },
    /// A batch inference call failed.
    #[error("inference failed: {message}")]
    Inference { message: String },
    /// The model returned probabilities violating the numeric contract.
    #[error("invalid probability distribution: {message}")]
    InvalidDistribution { message: String },
}

impl From<candle_core::Error> for ModelError {
    fn from(err: candle_core::Error) -> Self {
        ModelError::Inference {
            message: err.to_string(),
        }
    }
}

/// Snapshot of the runner's readiness for the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerHealth {
    pub backend: String,
    /// Device identifier: "cuda:0", "metal:0" or "cpu".
    pub device: String,
    pub accelerator_available: bool,
    pub models_loaded: bool,
    /// Accelerator memory, when the backend can report it.
    pub memory: Option<MemoryInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

/// Batch-scoring interface over the two loaded classifiers.
///
/// Both scoring calls are order-preserving: output\[i\] corresponds to
/// input\[i\]. Implementations must be pure functions of the input batch and
/// the loaded weights so results are batch-size invariant and cacheable.
#[async_trait]
pub trait SemanticClassifier: Send + Sync {
    async fn score_emotion(&self, texts: &[String]) -> Result<Vec<EmotionResult>, ModelError>;

    async fn score_sentiment(&self, texts: &[String]) -> Result<Vec<SentimentResult>, ModelError>;

    /// Force weights resident and verify inference readiness. Idempotent.
    async fn warm_up(&self) -> Result<(), ModelError>;

    fn health(&self) -> RunnerHealth;

    /// Model identifiers and device placement, also used to version cache
    /// keys.
    fn info(&self) -> ModelsInfo;
}

/// Which classifier implementation to run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local transformer inference via candle.
    #[default]
    Candle,
    /// Deterministic keyword scorer, no model artifacts required.
    Lexicon,
}

/// Model Runner configuration, injected by the deployment layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub backend: BackendKind,
    /// Local directory or hub repo id for the emotion classifier.
    pub emotion_model: String,
    /// Local directory or hub repo id for the sentiment classifier.
    pub sentiment_model: String,
    pub device: DevicePreference,
    /// Download cache for hub artifacts.
    pub cache_dir: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Candle,
            emotion_model: "j-hartmann/emotion-english-distilroberta-base".to_string(),
            sentiment_model: "cardiffnlp/twitter-roberta-base-sentiment-latest".to_string(),
            device: DevicePreference::Auto,
            cache_dir: None,
        }
    }
}

/// Create a classifier from configuration.
pub fn create_classifier(config: &ModelConfig) -> Result<Arc<dyn SemanticClassifier>> {
    let classifier: Arc<dyn SemanticClassifier> = match config.backend {
        BackendKind::Candle => Arc::new(CandleClassifier::new(config.clone())),
        BackendKind::Lexicon => Arc::new(LexiconClassifier::new()),
    };
    Ok(classifier)
}

/// Check the numeric contract: finite, non-negative, sums to 1 within
/// [`DISTRIBUTION_TOLERANCE`].
pub fn validate_distribution(probs: &[f32]) -> Result<(), ModelError> {
    let mut sum = 0.0f32;
    for p in probs {
        if !p.is_finite() || *p < 0.0 {
            return Err(ModelError::InvalidDistribution {
                message: format!("probability out of range: {p}"),
            });
        }
        sum += p;
    }
    if (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE {
        return Err(ModelError::InvalidDistribution {
            message: format!("distribution sums to {sum}, expected 1"),
        });
    }
    Ok(())
}
