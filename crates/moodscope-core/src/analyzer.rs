//! Top-level analysis orchestrator.
//!
//! Request lifecycle: validate, resolve caches, batched inference, aggregate,
//! respond; any stage can fail the whole request. For a fixed model version
//! and fixed input the assembled response is bit-for-bit identical across
//! calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moodscope_cache::ResultCache;
use moodscope_model::{RunnerHealth, SemanticClassifier};
use moodscope_schema::{AnalyzeRequest, AnalyzeResponse, ModelsInfo};

use crate::aggregate::aggregate;
use crate::config::{AppConfig, QualityConfig};
use crate::error::AnalysisError;
use crate::scheduler::BatchScheduler;

pub struct Analyzer {
    classifier: Arc<dyn SemanticClassifier>,
    scheduler: BatchScheduler,
    quality: QualityConfig,
    request_timeout: Duration,
}

impl Analyzer {
    pub fn new(
        classifier: Arc<dyn SemanticClassifier>,
        cache: Arc<dyn ResultCache>,
        config: &AppConfig,
    ) -> Self {
        let scheduler = BatchScheduler::new(classifier.clone(), cache, config.batch.clone());
        Self {
            classifier,
            scheduler,
            quality: config.quality.clone(),
            request_timeout: Duration::from_secs(config.batch.request_timeout_secs),
        }
    }

    /// Analyze one conversation. Fails as a whole if any message cannot be
    /// scored; succeeds with the full aggregate otherwise.
    pub async fn analyze(
        &self,
        request: &AnalyzeRequest,
    ) -> Result<AnalyzeResponse, AnalysisError> {
        validate(request)?;
        tracing::info!(
            conversation_id = request.conversation_id,
            messages = request.messages.len(),
            "analyzing conversation"
        );

        let texts: Vec<String> = request
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect();

        let started = Instant::now();
        let scored = match tokio::time::timeout(self.request_timeout, self.scheduler.score(&texts))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                // In-flight batches are abandoned; completed cache writes
                // remain valid.
                return Err(AnalysisError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let analysis = aggregate(&scored, &self.quality);
        Ok(AnalyzeResponse {
            conversation_id: request.conversation_id,
            analysis,
            status: "success".to_string(),
            models_info: self.classifier.info(),
        })
    }

    /// Load model weights and verify inference readiness. Idempotent; safe
    /// to call repeatedly.
    pub async fn warm_up(&self) -> Result<(), AnalysisError> {
        self.classifier
            .warm_up()
            .await
            .map_err(|e| AnalysisError::from_model("warm_up", e))
    }

    pub fn health(&self) -> RunnerHealth {
        self.classifier.health()
    }

    pub fn models_info(&self) -> ModelsInfo {
        self.classifier.info()
    }
}

fn validate(request: &AnalyzeRequest) -> Result<(), AnalysisError> {
    if request.messages.is_empty() {
        return Err(AnalysisError::validation(
            "conversation has no messages",
            None,
        ));
    }
    for (index, message) in request.messages.iter().enumerate() {
        if message.content.trim().is_empty() {
            return Err(AnalysisError::validation(
                "message content is empty",
                Some(index),
            ));
        }
    }
    Ok(())
}
