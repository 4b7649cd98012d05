//! Run-scoped memoization of secondary lookups
//!
//! A `LookupCache` owns a `Resolver` and calls it at most once per distinct
//! key. Failed lookups are not retried: the resolver's placeholder is stored
//! in their place and reused for the rest of the run.

use crate::error::Result;
use std::collections::HashMap;
use std::future::Future;

/// A secondary fetch keyed by a foreign identifier
pub trait Resolver {
    type Value: Clone;

    /// Label used in log lines
    const NAME: &'static str;

    fn fetch(&self, key: &str) -> impl Future<Output = Result<Self::Value>>;

    /// Value stored when `fetch` fails for `key`
    fn placeholder(&self, key: &str) -> Self::Value;

    /// Cache key for `key`; override for case-insensitive identifiers
    fn normalize(&self, key: &str) -> String {
        key.to_string()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub fetches: usize,
    pub failures: usize,
    pub hits: usize,
}

pub struct LookupCache<R: Resolver> {
    resolver: R,
    entries: HashMap<String, R::Value>,
    stats: CacheStats,
}

impl<R: Resolver> LookupCache<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Cached value for `key`, fetching it on first use
    pub async fn resolve(&mut self, key: &str) -> R::Value {
        let normalized = self.resolver.normalize(key);

        if let Some(value) = self.entries.get(&normalized) {
            self.stats.hits += 1;
            return value.clone();
        }

        self.stats.fetches += 1;
        let value = match self.resolver.fetch(key).await {
            Ok(value) => value,
            Err(e) => {
                self.stats.failures += 1;
                tracing::warn!(cache = R::NAME, key, error = %e, "lookup failed, using placeholder");
                self.resolver.placeholder(key)
            }
        };

        self.entries.insert(normalized, value.clone());
        self.stats.entries = self.entries.len();
        value
    }

    pub fn get(&self, key: &str) -> Option<&R::Value> {
        self.entries.get(&self.resolver.normalize(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of calls made to the resolver
    pub fn fetch_count(&self) -> usize {
        self.stats.fetches
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }
}
