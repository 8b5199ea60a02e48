//! In-process cache backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{CachedValue, ResultCache};

/// Hash-map cache with per-entry expiry. Strongly consistent within the
/// process; used for tests and cache-less single-instance deployments.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (CachedValue, Option<Instant>)>>,
    ttl: Option<Duration>,
}

impl MemoryCache {
    /// Cache without expiry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: None,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get_many(&self, keys: &[String]) -> HashMap<String, CachedValue> {
        let now = Instant::now();
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return HashMap::new(),
        };
        let mut found = HashMap::new();
        for key in keys {
            let expired = match entries.get(key) {
                Some((_, Some(deadline))) => *deadline <= now,
                Some((_, None)) => false,
                None => continue,
            };
            if expired {
                entries.remove(key);
            } else if let Some((value, _)) = entries.get(key) {
                found.insert(key.clone(), value.clone());
            }
        }
        found
    }

    async fn put_many(&self, items: Vec<(String, CachedValue)>) {
        let deadline = self.ttl.map(|ttl| Instant::now() + ttl);
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => {
                tracing::warn!("memory cache poisoned, dropping {} writes", items.len());
                return;
            }
        };
        for (key, value) in items {
            entries.insert(key, (value, deadline));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache_key, ResultKind};
    use moodscope_schema::{Polarity, SentimentResult};

    fn sentiment(score: f32) -> CachedValue {
        CachedValue::Sentiment(SentimentResult {
            label: Polarity::Positive,
            score,
        })
    }

    #[tokio::test]
    async fn hit_returns_what_was_stored() {
        let cache = MemoryCache::new();
        let key = cache_key(ResultKind::Sentiment, "v1", "hello");
        cache.put_many(vec![(key.clone(), sentiment(0.8))]).await;

        let found = cache.get_many(&[key.clone()]).await;
        assert_eq!(found.get(&key), Some(&sentiment(0.8)));
    }

    #[tokio::test]
    async fn absent_keys_are_simply_absent() {
        let cache = MemoryCache::new();
        let found = cache
            .get_many(&[cache_key(ResultKind::Emotion, "v1", "missing")])
            .await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = MemoryCache::with_ttl(Duration::from_millis(0));
        let key = cache_key(ResultKind::Sentiment, "v1", "hello");
        cache.put_many(vec![(key.clone(), sentiment(0.8))]).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get_many(&[key]).await.is_empty());
    }

    #[tokio::test]
    async fn identical_key_overwrite_replaces_value() {
        let cache = MemoryCache::new();
        let key = cache_key(ResultKind::Sentiment, "v1", "hello");
        cache.put_many(vec![(key.clone(), sentiment(0.5))]).await;
        cache.put_many(vec![(key.clone(), sentiment(0.9))]).await;

        let found = cache.get_many(&[key.clone()]).await;
        assert_eq!(found.get(&key), Some(&sentiment(0.9)));
    }
}
