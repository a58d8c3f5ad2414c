//! Query cache (spec §4.7, component C10).

pub mod query_cache;

pub use query_cache::{CacheStats, CachedQuery, QueryCache};
