//! Database configuration, durability levels, and the DSN surface (spec §6,
//! SPEC_FULL.md §D).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Trade-off between write latency and crash-safety for the WAL (spec §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DurabilityLevel {
    /// fsync after every commit. Safest, slowest.
    Synchronous,
    /// Batch fsyncs across concurrent commits.
    GroupCommit { max_batch_size: usize, max_wait_us: u64 },
    /// Background thread fsyncs on a fixed interval.
    Periodic { interval_ms: u64 },
    /// Never fsync explicitly; rely on OS buffering. Tests only.
    NoSync,
}

impl Default for DurabilityLevel {
    fn default() -> Self {
        DurabilityLevel::GroupCommit { max_batch_size: 1000, max_wait_us: 1000 }
    }
}

impl DurabilityLevel {
    pub fn requires_immediate_sync(&self) -> bool {
        matches!(self, Self::Synchronous)
    }

    pub fn is_no_sync(&self) -> bool {
        matches!(self, Self::NoSync)
    }
}

/// Storage backend flavor (spec §4.4, component C6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    /// Nothing survives process exit.
    Memory,
    /// In-memory rows, WAL-backed durability.
    Wal,
    /// Rows and indexes both live on disk.
    Disk,
    /// Rows on disk, indexes kept in memory.
    Index,
    /// Hot rows cached in memory (bounded by `max_memory_bytes`), cold rows on disk.
    Hybrid,
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::Memory
    }
}

/// Database-wide configuration (spec §6, SPEC_FULL.md §D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DBConfig {
    pub mode: StorageMode,
    pub path: Option<PathBuf>,
    /// Hybrid mode only: bound on resident row bytes before eviction.
    pub max_memory_bytes: Option<u64>,
    pub compress_files: bool,
    pub checkpoint_every: Option<u64>,
    #[serde(with = "duration_millis_opt")]
    pub checkpoint_interval: Option<Duration>,
    pub wal_buffer_size: usize,
    pub tenant: String,
    pub durability: DurabilityLevel,
    pub recursive_cte_limit: usize,
    #[serde(with = "duration_millis_opt")]
    pub query_timeout: Option<Duration>,
    pub query_cache_size: usize,
}

impl Default for DBConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::default(),
            path: None,
            max_memory_bytes: None,
            compress_files: false,
            checkpoint_every: Some(10_000),
            checkpoint_interval: Some(Duration::from_secs(60)),
            wal_buffer_size: 64 * 1024,
            tenant: "default".to_string(),
            durability: DurabilityLevel::default(),
            recursive_cte_limit: 10_000,
            query_timeout: None,
            query_cache_size: 256,
        }
    }
}

impl DBConfig {
    pub fn for_testing() -> Self {
        Self { mode: StorageMode::Memory, durability: DurabilityLevel::NoSync, ..Default::default() }
    }

    pub fn for_memory() -> Self {
        Self { mode: StorageMode::Memory, ..Default::default() }
    }

    pub fn for_wal(path: impl Into<PathBuf>) -> Self {
        Self { mode: StorageMode::Wal, path: Some(path.into()), ..Default::default() }
    }

    pub fn for_disk(path: impl Into<PathBuf>) -> Self {
        Self { mode: StorageMode::Disk, path: Some(path.into()), ..Default::default() }
    }

    pub fn for_hybrid(path: impl Into<PathBuf>, max_memory_bytes: u64) -> Self {
        Self {
            mode: StorageMode::Hybrid,
            path: Some(path.into()),
            max_memory_bytes: Some(max_memory_bytes),
            ..Default::default()
        }
    }

    /// Layers the spec §6 environment variables over `Default::default()`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("TINYSQL_PATH") {
            config.path = Some(PathBuf::from(path));
        }
        if let Ok(mode) = std::env::var("TINYSQL_MODE") {
            if let Some(parsed) = parse_mode(&mode) {
                config.mode = parsed;
            }
        }
        if let Ok(bytes) = std::env::var("TINYSQL_MAX_MEM_BYTES") {
            if let Ok(n) = bytes.parse() {
                config.max_memory_bytes = Some(n);
            }
        }
        if let Ok(every) = std::env::var("TINYSQL_WAL_CHECKPOINT_EVERY") {
            if let Ok(n) = every.parse() {
                config.checkpoint_every = Some(n);
            }
        }
        if let Ok(ms) = std::env::var("TINYSQL_WAL_CHECKPOINT_INTERVAL_MS") {
            if let Ok(n) = ms.parse() {
                config.checkpoint_interval = Some(Duration::from_millis(n));
            }
        }
        config
    }
}

fn parse_mode(s: &str) -> Option<StorageMode> {
    match s.to_ascii_lowercase().as_str() {
        "memory" => Some(StorageMode::Memory),
        "wal" => Some(StorageMode::Wal),
        "disk" => Some(StorageMode::Disk),
        "index" => Some(StorageMode::Index),
        "hybrid" => Some(StorageMode::Hybrid),
        _ => None,
    }
}

/// Resolved from a `Dsn::parse` call: the config plus whether the caller
/// asked for the database to be saved automatically on close.
pub struct DsnResolved {
    pub config: DBConfig,
    pub autosave: bool,
}

pub struct Dsn;

impl Dsn {
    /// Parses `mem://?tenant=NAME` or `file:/path?tenant=NAME&autosave=1`
    /// (spec §6) into a `DBConfig` plus an autosave flag.
    pub fn parse(dsn: &str) -> Result<DsnResolved> {
        let (scheme, rest) = dsn
            .split_once("://")
            .or_else(|| dsn.split_once(':'))
            .ok_or_else(|| Error::catalog(format!("invalid DSN '{dsn}': missing scheme")))?;

        let (path_part, query_part) = match rest.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (rest, None),
        };

        let mut config = match scheme {
            "mem" => DBConfig::for_memory(),
            "file" => {
                if path_part.is_empty() {
                    return Err(Error::catalog(format!("invalid DSN '{dsn}': file scheme requires a path")));
                }
                DBConfig::for_disk(path_part)
            }
            other => return Err(Error::catalog(format!("invalid DSN '{dsn}': unknown scheme '{other}'"))),
        };

        let mut autosave = false;
        if let Some(query) = query_part {
            for pair in query.split('&') {
                if pair.is_empty() {
                    continue;
                }
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                match key {
                    "tenant" => config.tenant = value.to_string(),
                    "autosave" => autosave = value == "1" || value.eq_ignore_ascii_case("true"),
                    "mode" => {
                        if let Some(parsed) = parse_mode(value) {
                            config.mode = parsed;
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(DsnResolved { config, autosave })
    }
}

mod duration_millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        value.map(|d| d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DBConfig::default();
        assert_eq!(config.mode, StorageMode::Memory);
        assert_eq!(config.tenant, "default");
    }

    #[test]
    fn test_for_testing_uses_no_sync() {
        let config = DBConfig::for_testing();
        assert!(config.durability.is_no_sync());
    }

    #[test]
    fn test_dsn_mem_with_tenant() {
        let resolved = Dsn::parse("mem://?tenant=acme").unwrap();
        assert_eq!(resolved.config.mode, StorageMode::Memory);
        assert_eq!(resolved.config.tenant, "acme");
        assert!(!resolved.autosave);
    }

    #[test]
    fn test_dsn_file_with_autosave() {
        let resolved = Dsn::parse("file:/tmp/tinysql.db?tenant=acme&autosave=1").unwrap();
        assert_eq!(resolved.config.mode, StorageMode::Disk);
        assert_eq!(resolved.config.path, Some(PathBuf::from("/tmp/tinysql.db")));
        assert!(resolved.autosave);
    }

    #[test]
    fn test_dsn_unknown_scheme_errors() {
        assert!(Dsn::parse("ftp://nope").is_err());
    }
}
