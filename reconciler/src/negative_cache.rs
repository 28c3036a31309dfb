//! Short-lived memo of keys the provider answered "not found" for.
use crate::metrics_defs::{NEGATIVE_CACHE_HIT, NEGATIVE_CACHE_MISS};
use moka::sync::Cache;
use shared::counter;
use std::hash::Hash;
use std::time::Duration;

pub struct NegativeCache<K> {
    cache: Cache<K, ()>,
}

impl<K> NegativeCache<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        NegativeCache { cache }
    }

    pub fn insert(&self, key: &K) {
        self.cache.insert(key.clone(), ());
    }

    pub fn contains(&self, key: &K) -> bool {
        let cache_hit = self.cache.contains_key(key);
        let metric_def = if cache_hit {
            NEGATIVE_CACHE_HIT
        } else {
            NEGATIVE_CACHE_MISS
        };
        counter!(metric_def).increment(1);
        cache_hit
    }
}
