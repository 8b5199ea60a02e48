use thiserror::Error;

use moodscope_model::ModelError;

/// Error taxonomy for one analysis request. A request either fully succeeds
/// or fails with one of these; no partial analysis is ever returned.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Rejected before any inference work.
    #[error("validation failed: {reason}")]
    Validation {
        reason: String,
        /// Index of the offending message, when one message is at fault.
        message_index: Option<usize>,
    },

    /// Model weights could not be loaded; the service cannot analyze until
    /// resolved. Health checks keep responding.
    #[error("model unavailable: {message}")]
    ModelUnavailable { message: String },

    /// A batch inference call failed after the reduced-size retry.
    #[error("inference failed during {stage}: {message}")]
    Inference {
        stage: &'static str,
        message: String,
    },

    /// The per-request deadline elapsed; in-flight work was abandoned.
    #[error("analysis timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
}

impl AnalysisError {
    pub fn validation(reason: impl Into<String>, message_index: Option<usize>) -> Self {
        AnalysisError::Validation {
            reason: reason.into(),
            message_index,
        }
    }

    pub(crate) fn inference(stage: &'static str, message: impl Into<String>) -> Self {
        AnalysisError::Inference {
            stage,
            message: message.into(),
        }
    }

    /// Classify a runner error: missing weights mean the service is down,
    /// anything else is a failed batch.
    pub(crate) fn from_model(stage: &'static str, err: ModelError) -> Self {
        match err {
            ModelError::WeightsUnavailable { message } => {
                AnalysisError::ModelUnavailable { message }
            }
            other => AnalysisError::Inference {
                stage,
                message: other.to_string(),
            },
        }
    }
}
