//! Query cache (spec §4.7, component C10): an LRU from exact SQL text to a
//! compiled (parsed) statement, so repeated executions of the same query
//! skip lexing and parsing.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::RwLock;

use crate::error::Result;
use crate::sql::ast::Statement;
use crate::sql::parse_sql;

/// A parsed statement plus the text it was parsed from, ready for repeated
/// execution. Cached entries are immutable: once compiled, a `CachedQuery`
/// is never mutated in place, only evicted and recompiled.
#[derive(Debug, Clone)]
pub struct CachedQuery {
    pub sql: String,
    pub statements: Arc<Vec<Statement>>,
}

/// Cache statistics (spec §4.7 `Stats`).
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// SQL-text-keyed LRU of compiled statements (spec §4.7). Parameterized
/// queries bind `?` placeholders at execution time, not at cache-key time,
/// so identical SQL text with different bound values shares one cache
/// entry instead of polluting the cache per call.
pub struct QueryCache {
    entries: RwLock<LruCache<String, CachedQuery>>,
    stats: RwLock<CacheStats>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(LruCache::new(NonZeroUsize::new(capacity).unwrap())),
            stats: RwLock::new(CacheStats { hits: 0, misses: 0, size: 0, capacity }),
        }
    }

    /// Parses `sql` on a cache miss, otherwise returns the cached statement
    /// list. `sql` is used verbatim as the cache key (spec §4.7, §7).
    pub fn compile(&self, sql: &str) -> Result<CachedQuery> {
        if let Some(cached) = self.entries.write().get(sql).cloned() {
            self.stats.write().hits += 1;
            return Ok(cached);
        }

        let statements = parse_sql(sql)?;
        let cached = CachedQuery { sql: sql.to_string(), statements: Arc::new(statements) };

        let mut entries = self.entries.write();
        entries.put(sql.to_string(), cached.clone());
        let mut stats = self.stats.write();
        stats.misses += 1;
        stats.size = entries.len();
        Ok(cached)
    }

    /// Parses `sql`, panicking on a parse error. Mirrors `regexp.MustCompile`
    /// style helpers: useful for statements baked in at startup (migrations,
    /// fixed internal queries) where a parse failure is a programming error.
    pub fn must_compile(&self, sql: &str) -> CachedQuery {
        self.compile(sql).unwrap_or_else(|err| panic!("query cache: failed to compile {sql:?}: {err}"))
    }

    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().clone();
        stats.size = self.entries.read().len();
        stats
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        let mut stats = self.stats.write();
        stats.hits = 0;
        stats.misses = 0;
        stats.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_then_hit() {
        let cache = QueryCache::new(8);
        cache.compile("SELECT 1").unwrap();
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);

        cache.compile("SELECT 1").unwrap();
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_eviction_at_capacity() {
        let cache = QueryCache::new(1);
        cache.compile("SELECT 1").unwrap();
        cache.compile("SELECT 2").unwrap();
        assert_eq!(cache.size(), 1);
        // "SELECT 1" was evicted; recompiling it is a fresh miss.
        let stats_before = cache.stats().misses;
        cache.compile("SELECT 1").unwrap();
        assert_eq!(cache.stats().misses, stats_before + 1);
    }

    #[test]
    fn test_clear_resets_stats_and_entries() {
        let cache = QueryCache::new(4);
        cache.compile("SELECT 1").unwrap();
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_parse_error_not_cached() {
        let cache = QueryCache::new(4);
        assert!(cache.compile("SELECT FROM").is_err());
        assert_eq!(cache.size(), 0);
    }
}
