// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Caching layer for judge verdicts

use super::{GradingSchema, JudgeVerdict};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cache of individual judge verdicts
pub struct VerdictCache {
    cache: Cache<VerdictKey, JudgeVerdict>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl VerdictCache {
    /// Create a new cache with specified TTL in seconds
    pub fn new(ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            cache,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, key: &VerdictKey) -> Option<JudgeVerdict> {
        match self.cache.get(key).await {
            Some(verdict) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(verdict)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn set(&self, key: VerdictKey, verdict: JudgeVerdict) {
        self.cache.insert(key, verdict).await;
    }

    /// Clear entire cache
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            entry_count: self.cache.entry_count(),
        }
    }
}

/// Cache key over model, endpoint, schema and the full rendered prompt.
///
/// The prompt is kept verbatim so distinct prompts never share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VerdictKey {
    model: String,
    endpoint: String,
    schema: String,
    prompt: String,
}

impl VerdictKey {
    pub fn new(model: &str, endpoint: &str, prompt: &str, schema: &GradingSchema) -> Self {
        Self {
            model: model.to_string(),
            endpoint: endpoint.to_string(),
            schema: schema.cache_tag(),
            prompt: prompt.to_string(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict() -> JudgeVerdict {
        JudgeVerdict {
            model: "m".to_string(),
            score: 1.0,
            reasoning: "ok".to_string(),
        }
    }

    #[tokio::test]
    async fn test_cache_stats() {
        let cache = VerdictCache::new(3600);
        let key = VerdictKey::new("m", "https://judge.local/v1", "prompt", &GradingSchema::Binary);

        // Miss
        assert!(cache.get(&key).await.is_none());

        // Hit
        cache.set(key.clone(), verdict()).await;
        assert_eq!(cache.get(&key).await, Some(verdict()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn test_key_separates_models_endpoints_and_schemas() {
        let key = |model: &str, endpoint: &str, prompt: &str, schema: &GradingSchema| {
            VerdictKey::new(model, endpoint, prompt, schema)
        };
        let binary = GradingSchema::Binary;
        let base = key("m", "https://a.local/v1", "prompt", &binary);

        assert_eq!(base, key("m", "https://a.local/v1", "prompt", &binary));
        assert_ne!(base, key("other", "https://a.local/v1", "prompt", &binary));
        assert_ne!(base, key("m", "https://b.local/v1", "prompt", &binary));
        assert_ne!(base, key("m", "https://a.local/v1", "prompt ", &binary));
        assert_ne!(base, key("m", "https://a.local/v1", "prompt", &GradingSchema::numeric(0.0, 1.0, 0.1)));
    }

    #[tokio::test]
    async fn test_same_model_on_other_endpoint_misses() {
        let cache = VerdictCache::new(3600);
        let first = VerdictKey::new("gpt-4o", "https://a.local/v1", "prompt", &GradingSchema::Binary);
        let second = VerdictKey::new("gpt-4o", "https://b.local/v1", "prompt", &GradingSchema::Binary);

        cache.set(first.clone(), verdict()).await;
        assert!(cache.get(&second).await.is_none());
        assert_eq!(cache.get(&first).await, Some(verdict()));
    }
}
