pub mod aggregate;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod scheduler;

pub use aggregate::{aggregate as aggregate_conversation, quality_score};
pub use analyzer::Analyzer;
pub use config::{AppConfig, BatchConfig, QualityConfig, ServerConfig};
pub use error::AnalysisError;
pub use scheduler::{BatchScheduler, ScoredMessage};
