//! Batch scheduling: cache resolution, chunking, gated inference, merge.
//!
//! Batching exists purely for throughput; per-message results must match
//! single-item inference. Concurrent batches queue on a semaphore so the
//! accelerator context is never oversubscribed, while cache lookups of other
//! requests proceed in parallel.

use std::ops::Range;
use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::Semaphore;

use moodscope_cache::{cache_key, CachedValue, ResultCache, ResultKind};
use moodscope_model::{ModelError, SemanticClassifier};
use moodscope_schema::{EmotionResult, SentimentResult};

use crate::config::BatchConfig;
use crate::error::AnalysisError;

/// Both per-message results for one input message.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMessage {
    pub emotion: EmotionResult,
    pub sentiment: SentimentResult,
}

pub struct BatchScheduler {
    classifier: Arc<dyn SemanticClassifier>,
    cache: Arc<dyn ResultCache>,
    config: BatchConfig,
    /// Admission gate for batches onto the model runner; FIFO, shared by all
    /// requests going through this scheduler.
    gate: Arc<Semaphore>,
}

impl BatchScheduler {
    pub fn new(
        classifier: Arc<dyn SemanticClassifier>,
        cache: Arc<dyn ResultCache>,
        config: BatchConfig,
    ) -> Self {
        let permits = config.max_concurrent_batches.max(1);
        Self {
            classifier,
            cache,
            config,
            gate: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Score every text, emotion and sentiment, in input order.
    pub async fn score(&self, texts: &[String]) -> Result<Vec<ScoredMessage>, AnalysisError> {
        let info = self.classifier.info();
        let emotion_keys: Vec<String> = texts
            .iter()
            .map(|t| cache_key(ResultKind::Emotion, &info.emotion_model, t))
            .collect();
        let sentiment_keys: Vec<String> = texts
            .iter()
            .map(|t| cache_key(ResultKind::Sentiment, &info.sentiment_model, t))
            .collect();

        let mut all_keys = emotion_keys.clone();
        all_keys.extend(sentiment_keys.iter().cloned());
        let cached = self.cache.get_many(&all_keys).await;

        let mut emotions: Vec<Option<EmotionResult>> = emotion_keys
            .iter()
            .map(|key| match cached.get(key) {
                Some(CachedValue::Emotion(result)) => Some(result.clone()),
                _ => None,
            })
            .collect();
        let mut sentiments: Vec<Option<SentimentResult>> = sentiment_keys
            .iter()
            .map(|key| match cached.get(key) {
                Some(CachedValue::Sentiment(result)) => Some(result.clone()),
                _ => None,
            })
            .collect();

        let emotion_misses: Vec<usize> = (0..texts.len()).filter(|i| emotions[*i].is_none()).collect();
        let sentiment_misses: Vec<usize> =
            (0..texts.len()).filter(|i| sentiments[*i].is_none()).collect();
        tracing::debug!(
            messages = texts.len(),
            emotion_misses = emotion_misses.len(),
            sentiment_misses = sentiment_misses.len(),
            "cache resolved"
        );

        let (fresh_emotions, fresh_sentiments) = tokio::try_join!(
            self.run_emotion_batches(texts, &emotion_misses),
            self.run_sentiment_batches(texts, &sentiment_misses),
        )?;

        let mut writes: Vec<(String, CachedValue)> = Vec::new();
        for (index, result) in fresh_emotions {
            writes.push((
                emotion_keys[index].clone(),
                CachedValue::Emotion(result.clone()),
            ));
            emotions[index] = Some(result);
        }
        for (index, result) in fresh_sentiments {
            writes.push((
                sentiment_keys[index].clone(),
                CachedValue::Sentiment(result.clone()),
            ));
            sentiments[index] = Some(result);
        }
        if !writes.is_empty() {
            // Off the critical path; failures are the cache layer's problem.
            let cache = self.cache.clone();
            tokio::spawn(async move { cache.put_many(writes).await });
        }

        let mut scored = Vec::with_capacity(texts.len());
        for (index, (emotion, sentiment)) in emotions.into_iter().zip(sentiments).enumerate() {
            match (emotion, sentiment) {
                (Some(emotion), Some(sentiment)) => scored.push(ScoredMessage { emotion, sentiment }),
                _ => {
                    return Err(AnalysisError::inference(
                        "merge",
                        format!("no result produced for message {index}"),
                    ))
                }
            }
        }
        Ok(scored)
    }

    async fn run_emotion_batches(
        &self,
        texts: &[String],
        misses: &[usize],
    ) -> Result<Vec<(usize, EmotionResult)>, AnalysisError> {
        let plan = plan_batches(misses.len(), self.config.max_batch_size);
        let batches = plan.into_iter().map(|range| {
            let indices = &misses[range];
            let batch: Vec<String> = indices.iter().map(|i| texts[*i].clone()).collect();
            async move {
                let results = self.emotion_with_retry(&batch).await?;
                Ok::<_, AnalysisError>(indices.iter().copied().zip(results).collect::<Vec<_>>())
            }
        });
        let scored = try_join_all(batches).await?;
        Ok(scored.into_iter().flatten().collect())
    }

    async fn run_sentiment_batches(
        &self,
        texts: &[String],
        misses: &[usize],
    ) -> Result<Vec<(usize, SentimentResult)>, AnalysisError> {
        let plan = plan_batches(misses.len(), self.config.max_batch_size);
        let batches = plan.into_iter().map(|range| {
            let indices = &misses[range];
            let batch: Vec<String> = indices.iter().map(|i| texts[*i].clone()).collect();
            async move {
                let results = self.sentiment_with_retry(&batch).await?;
                Ok::<_, AnalysisError>(indices.iter().copied().zip(results).collect::<Vec<_>>())
            }
        });
        let scored = try_join_all(batches).await?;
        Ok(scored.into_iter().flatten().collect())
    }

    /// One retry at half size: a failed batch is split in two and each half
    /// scored once more; a second failure fails the request.
    async fn emotion_with_retry(
        &self,
        batch: &[String],
    ) -> Result<Vec<EmotionResult>, AnalysisError> {
        match self.emotion_gated(batch).await {
            Ok(results) => Ok(results),
            Err(err @ ModelError::WeightsUnavailable { .. }) => {
                Err(AnalysisError::from_model("emotion", err))
            }
            Err(first) => {
                tracing::warn!(
                    batch = batch.len(),
                    "emotion batch failed ({first}), retrying at reduced size"
                );
                let mut results = Vec::with_capacity(batch.len());
                for half in split_for_retry(batch) {
                    let scored = self
                        .emotion_gated(half)
                        .await
                        .map_err(|e| AnalysisError::from_model("emotion", e))?;
                    results.extend(scored);
                }
                Ok(results)
            }
        }
    }

    async fn sentiment_with_retry(
        &self,
        batch: &[String],
    ) -> Result<Vec<SentimentResult>, AnalysisError> {
        match self.sentiment_gated(batch).await {
            Ok(results) => Ok(results),
            Err(err @ ModelError::WeightsUnavailable { .. }) => {
                Err(AnalysisError::from_model("sentiment", err))
            }
            Err(first) => {
                tracing::warn!(
                    batch = batch.len(),
                    "sentiment batch failed ({first}), retrying at reduced size"
                );
                let mut results = Vec::with_capacity(batch.len());
                for half in split_for_retry(batch) {
                    let scored = self
                        .sentiment_gated(half)
                        .await
                        .map_err(|e| AnalysisError::from_model("sentiment", e))?;
                    results.extend(scored);
                }
                Ok(results)
            }
        }
    }

    async fn emotion_gated(&self, batch: &[String]) -> Result<Vec<EmotionResult>, ModelError> {
        let _permit = self.gate.acquire().await.map_err(|_| ModelError::Inference {
            message: "accelerator gate closed".to_string(),
        })?;
        let results = self.classifier.score_emotion(batch).await?;
        check_count(batch.len(), results.len())?;
        Ok(results)
    }

    async fn sentiment_gated(&self, batch: &[String]) -> Result<Vec<SentimentResult>, ModelError> {
        let _permit = self.gate.acquire().await.map_err(|_| ModelError::Inference {
            message: "accelerator gate closed".to_string(),
        })?;
        let results = self.classifier.score_sentiment(batch).await?;
        check_count(batch.len(), results.len())?;
        Ok(results)
    }
}

fn check_count(expected: usize, actual: usize) -> Result<(), ModelError> {
    if expected != actual {
        return Err(ModelError::Inference {
            message: format!("result count mismatch: expected {expected}, got {actual}"),
        });
    }
    Ok(())
}

/// Partition `len` items into contiguous ranges of at most `max_batch`.
pub(crate) fn plan_batches(len: usize, max_batch: usize) -> Vec<Range<usize>> {
    let max_batch = max_batch.max(1);
    (0..len)
        .step_by(max_batch)
        .map(|start| start..(start + max_batch).min(len))
        .collect()
}

/// Split a failed batch into the halves retried once. A single-item batch is
/// retried as-is.
fn split_for_retry(batch: &[String]) -> Vec<&[String]> {
    if batch.len() > 1 {
        let mid = batch.len().div_ceil(2);
        let (left, right) = batch.split_at(mid);
        vec![left, right]
    } else {
        vec![batch]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_covers_everything_in_order() {
        let plan = plan_batches(40, 16);
        assert_eq!(plan, vec![0..16, 16..32, 32..40]);
    }

    #[test]
    fn plan_handles_small_inputs() {
        assert_eq!(plan_batches(1, 16), vec![0..1]);
        assert_eq!(plan_batches(0, 16), Vec::<Range<usize>>::new());
        assert_eq!(plan_batches(16, 16), vec![0..16]);
    }

    #[test]
    fn plan_treats_zero_max_as_one() {
        assert_eq!(plan_batches(2, 0), vec![0..1, 1..2]);
    }

    #[test]
    fn retry_split_halves_preserve_order() {
        let batch: Vec<String> = (0..5).map(|i| format!("m{i}")).collect();
        let halves = split_for_retry(&batch);
        assert_eq!(halves.len(), 2);
        assert_eq!(halves[0].len(), 3);
        assert_eq!(halves[1].len(), 2);
        assert_eq!(halves[0][0], "m0");
        assert_eq!(halves[1][0], "m3");
    }

    #[test]
    fn retry_split_keeps_single_item() {
        let batch = vec!["only".to_string()];
        let halves = split_for_retry(&batch);
        assert_eq!(halves, vec![&batch[..]]);
    }
}
