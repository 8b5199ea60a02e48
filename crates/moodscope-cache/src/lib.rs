pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use moodscope_schema::{EmotionResult, SentimentResult};

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

/// Which per-message result a cache entry holds. Emotion and sentiment are
/// cached independently so they can expire independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Emotion,
    Sentiment,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Emotion => "emotion",
            ResultKind::Sentiment => "sentiment",
        }
    }
}

/// A cached per-message result. Entries are content-addressed and never
/// mutated in place; an identical-key write replaces the whole value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedValue {
    Emotion(EmotionResult),
    Sentiment(SentimentResult),
}

/// Collapse whitespace runs so trivially reformatted text shares a
/// fingerprint. Case and punctuation are preserved: the models are sensitive
/// to both, and a hit must be observably equivalent to recomputation.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic content fingerprint of normalized text.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Full cache key: result kind, model version and content fingerprint. The
/// model version is part of the key so a version change never serves stale
/// results under the old key.
pub fn cache_key(kind: ResultKind, model_version: &str, text: &str) -> String {
    format!("{}:{}:{}", kind.as_str(), model_version, fingerprint(text))
}

/// Cross-request result cache.
///
/// `get_many` returns only the keys that are present; `put_many` is
/// fire-and-forget — backends log and swallow write failures so a cache
/// problem never fails an analysis.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get_many(&self, keys: &[String]) -> HashMap<String, CachedValue>;
    async fn put_many(&self, entries: Vec<(String, CachedValue)>);
}

/// Always-miss cache used when no backend is configured or the configured
/// backend is unavailable.
pub struct NoopCache;

#[async_trait]
impl ResultCache for NoopCache {
    async fn get_many(&self, _keys: &[String]) -> HashMap<String, CachedValue> {
        HashMap::new()
    }

    async fn put_many(&self, _entries: Vec<(String, CachedValue)>) {}
}

/// Cache Layer configuration, injected by the deployment layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Database path; in-memory when unset.
    pub path: Option<PathBuf>,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            ttl_secs: 3600,
        }
    }
}

/// Open the configured cache backend, degrading to the no-op cache if the
/// backend cannot be opened.
pub fn open_cache(config: &CacheConfig) -> Arc<dyn ResultCache> {
    if !config.enabled {
        return Arc::new(NoopCache);
    }
    let ttl = Duration::from_secs(config.ttl_secs);
    match &config.path {
        Some(path) => match SqliteCache::open(path, ttl) {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                tracing::warn!(
                    "cache backend unavailable ({e}), analysis proceeds uncached"
                );
                Arc::new(NoopCache)
            }
        },
        None => Arc::new(MemoryCache::with_ttl(ttl)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moodscope_schema::Polarity;

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(fingerprint("hello world"), fingerprint("hello world"));
        assert_ne!(fingerprint("hello world"), fingerprint("hello there"));
    }

    #[test]
    fn fingerprint_collapses_whitespace_only() {
        assert_eq!(fingerprint("hello   world"), fingerprint(" hello world "));
        // Case matters to the models, so it matters to the fingerprint.
        assert_ne!(fingerprint("Hello world"), fingerprint("hello world"));
    }

    #[test]
    fn cache_key_separates_kinds_and_versions() {
        let text = "some message";
        let a = cache_key(ResultKind::Emotion, "model-v1", text);
        let b = cache_key(ResultKind::Sentiment, "model-v1", text);
        let c = cache_key(ResultKind::Emotion, "model-v2", text);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn noop_cache_always_misses() {
        let cache = NoopCache;
        let key = cache_key(ResultKind::Sentiment, "v1", "text");
        cache
            .put_many(vec![(
                key.clone(),
                CachedValue::Sentiment(SentimentResult {
                    label: Polarity::Neutral,
                    score: 0.5,
                }),
            )])
            .await;
        assert!(cache.get_many(&[key]).await.is_empty());
    }

    #[test]
    fn open_cache_degrades_to_noop_on_unusable_path() {
        let config = CacheConfig {
            enabled: true,
            path: Some(PathBuf::from("/nonexistent-dir/deeper/cache.db")),
            ttl_secs: 60,
        };
        // Must not error; the returned cache simply never hits.
        let _cache = open_cache(&config);
    }

    #[test]
    fn cached_value_serde_roundtrip() {
        let value = CachedValue::Sentiment(SentimentResult {
            label: Polarity::Positive,
            score: 0.9,
        });
        let json = serde_json::to_string(&value).unwrap();
        let back: CachedValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
