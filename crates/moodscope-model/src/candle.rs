//! Transformer backend: BERT-family sequence classifiers via candle.
//!
//! Two checkpoints are loaded lazily (emotion and sentiment), each from a
//! local directory or a hub repo snapshot: `config.json`, `tokenizer.json`
//! and `model.safetensors`. Weights live on the selected device for the
//! process lifetime; there is no teardown. Inference runs on the blocking
//! pool.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{IndexOp, Tensor, D};
use candle_nn::ops::softmax;
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use serde::Deserialize;
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use moodscope_schema::{EmotionLabel, EmotionResult, ModelsInfo, Polarity, SentimentResult};

use crate::device::{device_label, select_device};
use crate::{validate_distribution, ModelConfig, ModelError, RunnerHealth, SemanticClassifier};

const MAX_SEQUENCE_LENGTH: usize = 512;

/// Subset of an HF `config.json` read alongside the candle BERT config.
#[derive(Debug, Deserialize)]
struct HeadConfig {
    id2label: Option<HashMap<String, String>>,
}

struct ClassifierHead {
    dense: Linear,
    out_proj: Linear,
}

struct LoadedModel {
    model: BertModel,
    tokenizer: Tokenizer,
    head: ClassifierHead,
    /// Output labels, ordered by logit index.
    labels: Vec<String>,
    device: candle_core::Device,
}

pub struct CandleClassifier {
    config: ModelConfig,
    device: candle_core::Device,
    emotion: OnceCell<Arc<LoadedModel>>,
    sentiment: OnceCell<Arc<LoadedModel>>,
}

impl CandleClassifier {
    /// Create the classifier without loading weights; the first scoring call
    /// or an explicit warm-up loads them.
    pub fn new(config: ModelConfig) -> Self {
        let device = select_device(config.device);
        Self {
            config,
            device,
            emotion: OnceCell::new(),
            sentiment: OnceCell::new(),
        }
    }

    async fn emotion_model(&self) -> Result<Arc<LoadedModel>, ModelError> {
        let source = self.config.emotion_model.clone();
        let cache_dir = self.config.cache_dir.clone();
        let device = self.device.clone();
        let loaded = self
            .emotion
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || load_model(&source, &cache_dir, device))
                    .await
                    .map_err(join_error)?
                    .map(Arc::new)
            })
            .await?;
        Ok(loaded.clone())
    }

    async fn sentiment_model(&self) -> Result<Arc<LoadedModel>, ModelError> {
        let source = self.config.sentiment_model.clone();
        let cache_dir = self.config.cache_dir.clone();
        let device = self.device.clone();
        let loaded = self
            .sentiment
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || load_model(&source, &cache_dir, device))
                    .await
                    .map_err(join_error)?
                    .map(Arc::new)
            })
            .await?;
        Ok(loaded.clone())
    }

    async fn probabilities(
        loaded: Arc<LoadedModel>,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, ModelError> {
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || classify_batch(&loaded, &texts))
            .await
            .map_err(join_error)?
    }
}

fn join_error(err: tokio::task::JoinError) -> ModelError {
    ModelError::Inference {
        message: format!("inference task aborted: {err}"),
    }
}

#[async_trait]
impl SemanticClassifier for CandleClassifier {
    async fn score_emotion(&self, texts: &[String]) -> Result<Vec<EmotionResult>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let loaded = self.emotion_model().await?;
        let rows = Self::probabilities(loaded.clone(), texts).await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            validate_distribution(&row)?;
            let mut scores: std::collections::BTreeMap<EmotionLabel, f32> =
                EmotionLabel::ALL.iter().map(|l| (*l, 0.0)).collect();
            for (name, prob) in loaded.labels.iter().zip(row.iter()) {
                let label =
                    EmotionLabel::parse(name).ok_or_else(|| ModelError::InvalidDistribution {
                        message: format!("unexpected emotion label: {name}"),
                    })?;
                scores.insert(label, *prob);
            }
            results.push(EmotionResult::from_scores(scores));
        }
        Ok(results)
    }

    async fn score_sentiment(&self, texts: &[String]) -> Result<Vec<SentimentResult>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let loaded = self.sentiment_model().await?;
        let rows = Self::probabilities(loaded.clone(), texts).await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            validate_distribution(&row)?;
            let (best, score) = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .ok_or_else(|| ModelError::InvalidDistribution {
                    message: "empty sentiment distribution".to_string(),
                })?;
            let name = loaded.labels.get(best).map(String::as_str).unwrap_or("");
            let label = match name.to_ascii_lowercase().as_str() {
                "positive" => Polarity::Positive,
                "negative" => Polarity::Negative,
                "neutral" => Polarity::Neutral,
                other => {
                    return Err(ModelError::InvalidDistribution {
                        message: format!("unexpected sentiment label: {other}"),
                    })
                }
            };
            results.push(SentimentResult {
                label,
                score: *score,
            });
        }
        Ok(results)
    }

    async fn warm_up(&self) -> Result<(), ModelError> {
        let probe = vec!["warm-up probe message".to_string()];
        self.score_emotion(&probe).await?;
        self.score_sentiment(&probe).await?;
        tracing::info!(
            emotion = %self.config.emotion_model,
            sentiment = %self.config.sentiment_model,
            device = %device_label(&self.device),
            "model runner warmed up"
        );
        Ok(())
    }

    fn health(&self) -> RunnerHealth {
        RunnerHealth {
            backend: "candle".to_string(),
            device: device_label(&self.device),
            accelerator_available: self.device.is_cuda() || self.device.is_metal(),
            models_loaded: self.emotion.get().is_some() && self.sentiment.get().is_some(),
            memory: None,
        }
    }

    fn info(&self) -> ModelsInfo {
        ModelsInfo {
            emotion_model: self.config.emotion_model.clone(),
            sentiment_model: self.config.sentiment_model.clone(),
            device: device_label(&self.device),
        }
    }
}

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

/// Resolve artifact paths: a local directory wins, otherwise the hub cache.
fn locate_files(source: &str, cache_dir: &Option<PathBuf>) -> Result<ModelFiles, ModelError> {
    let local = Path::new(source);
    if local.is_dir() {
        return Ok(ModelFiles {
            config: local.join("config.json"),
            tokenizer: local.join("tokenizer.json"),
            weights: local.join("model.safetensors"),
        });
    }

    let mut builder = hf_hub::api::sync::ApiBuilder::new();
    if let Some(dir) = cache_dir {
        builder = builder.with_cache_dir(dir.clone());
    }
    let api = builder.build().map_err(|e| ModelError::WeightsUnavailable {
        message: format!("hub api init failed: {e}"),
    })?;
    let repo = api.model(source.to_string());
    let fetch = |file: &str| {
        repo.get(file).map_err(|e| ModelError::WeightsUnavailable {
            message: format!("fetch of {file} from {source} failed: {e}"),
        })
    };
    Ok(ModelFiles {
        config: fetch("config.json")?,
        tokenizer: fetch("tokenizer.json")?,
        weights: fetch("model.safetensors")?,
    })
}

fn load_model(
    source: &str,
    cache_dir: &Option<PathBuf>,
    device: candle_core::Device,
) -> Result<LoadedModel, ModelError> {
    let files = locate_files(source, cache_dir)?;

    let raw_config =
        fs::read_to_string(&files.config).map_err(|e| ModelError::WeightsUnavailable {
            message: format!("read of {} failed: {e}", files.config.display()),
        })?;
    let bert_config: BertConfig =
        serde_json::from_str(&raw_config).map_err(|e| ModelError::WeightsUnavailable {
            message: format!("config parse failed for {source}: {e}"),
        })?;
    let head_config: HeadConfig =
        serde_json::from_str(&raw_config).map_err(|e| ModelError::WeightsUnavailable {
            message: format!("config parse failed for {source}: {e}"),
        })?;
    let labels = ordered_labels(&head_config).ok_or_else(|| ModelError::WeightsUnavailable {
        message: format!("config.json for {source} carries no id2label map"),
    })?;

    let mut tokenizer =
        Tokenizer::from_file(&files.tokenizer).map_err(|e| ModelError::Tokenizer {
            message: format!("tokenizer load failed for {source}: {e}"),
        })?;
    tokenizer.with_padding(Some(PaddingParams::default()));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: MAX_SEQUENCE_LENGTH,
            ..Default::default()
        }))
        .map_err(|e| ModelError::Tokenizer {
            message: format!("tokenizer truncation setup failed for {source}: {e}"),
        })?;

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[files.weights.clone()], DTYPE, &device).map_err(
            |e| ModelError::WeightsUnavailable {
                message: format!("weight mmap failed for {source}: {e}"),
            },
        )?
    };
    let model =
        BertModel::load(vb.clone(), &bert_config).map_err(|e| ModelError::WeightsUnavailable {
            message: format!("encoder load failed for {source}: {e}"),
        })?;
    let hidden = bert_config.hidden_size;
    let dense = candle_nn::linear(hidden, hidden, vb.pp("classifier.dense")).map_err(|e| {
        ModelError::WeightsUnavailable {
            message: format!("classifier head load failed for {source}: {e}"),
        }
    })?;
    let out_proj = candle_nn::linear(hidden, labels.len(), vb.pp("classifier.out_proj")).map_err(
        |e| ModelError::WeightsUnavailable {
            message: format!("classifier head load failed for {source}: {e}"),
        },
    )?;

    tracing::info!(
        model = %source,
        labels = labels.len(),
        device = %device_label(&device),
        "classifier loaded"
    );

    Ok(LoadedModel {
        model,
        tokenizer,
        head: ClassifierHead { dense, out_proj },
        labels,
        device,
    })
}

/// Order labels by their logit index from the `id2label` map.
fn ordered_labels(config: &HeadConfig) -> Option<Vec<String>> {
    let map = config.id2label.as_ref()?;
    let mut entries: Vec<(usize, String)> = map
        .iter()
        .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v.to_lowercase())))
        .collect();
    if entries.len() != map.len() || entries.is_empty() {
        return None;
    }
    entries.sort_by_key(|(i, _)| *i);
    Some(entries.into_iter().map(|(_, v)| v).collect())
}

/// Tokenize and run one batch through the encoder and classification head.
fn classify_batch(loaded: &LoadedModel, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
    let encodings = loaded
        .tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| ModelError::Tokenizer {
            message: format!("batch encode failed: {e}"),
        })?;

    let mut id_rows = Vec::with_capacity(encodings.len());
    let mut mask_rows = Vec::with_capacity(encodings.len());
    for encoding in &encodings {
        id_rows.push(Tensor::new(encoding.get_ids(), &loaded.device)?);
        mask_rows.push(Tensor::new(encoding.get_attention_mask(), &loaded.device)?);
    }
    let input_ids = Tensor::stack(&id_rows, 0)?;
    let attention_mask = Tensor::stack(&mask_rows, 0)?;
    let token_type_ids = input_ids.zeros_like()?;

    let sequence = loaded
        .model
        .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
    // Classification head over the first (CLS) token.
    let cls = sequence.i((.., 0))?;
    let hidden = loaded.head.dense.forward(&cls)?.tanh()?;
    let logits = loaded.head.out_proj.forward(&hidden)?;
    let probs = softmax(&logits, D::Minus1)?;
    Ok(probs.to_vec2::<f32>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BackendKind;

    #[test]
    fn ordered_labels_sorts_by_index() {
        let mut map = HashMap::new();
        map.insert("2".to_string(), "Positive".to_string());
        map.insert("0".to_string(), "Negative".to_string());
        map.insert("1".to_string(), "Neutral".to_string());
        let labels = ordered_labels(&HeadConfig { id2label: Some(map) }).unwrap();
        assert_eq!(labels, vec!["negative", "neutral", "positive"]);
    }

    #[test]
    fn ordered_labels_rejects_non_numeric_keys() {
        let mut map = HashMap::new();
        map.insert("zero".to_string(), "negative".to_string());
        assert!(ordered_labels(&HeadConfig { id2label: Some(map) }).is_none());
    }

    #[test]
    fn construction_does_not_load_weights() {
        let config = ModelConfig {
            backend: BackendKind::Candle,
            emotion_model: "does/not-exist".to_string(),
            sentiment_model: "does/not-exist".to_string(),
            device: crate::DevicePreference::Cpu,
            cache_dir: None,
        };
        let classifier = CandleClassifier::new(config);
        let health = classifier.health();
        assert!(!health.models_loaded);
        assert_eq!(health.backend, "candle");
    }

    #[tokio::test]
    async fn missing_local_artifacts_surface_as_weights_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig {
            backend: BackendKind::Candle,
            emotion_model: dir.path().to_string_lossy().to_string(),
            sentiment_model: dir.path().to_string_lossy().to_string(),
            device: crate::DevicePreference::Cpu,
            cache_dir: None,
        };
        let classifier = CandleClassifier::new(config);
        let err = classifier
            .score_emotion(&["hello".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::WeightsUnavailable { .. }));
    }
}
