//! Disk backend (spec §4.4): one binary file per table, loaded into an LRU
//! cache on demand. An evicted table is flushed to its file first so no
//! write is lost to eviction.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashSet;
use lru::LruCache;
use parking_lot::RwLock;

use super::{table_key, BackendStats, StorageBackend, TableData};
use crate::error::Result;

const DEFAULT_CACHE_CAPACITY: usize = 64;

pub struct DiskBackend {
    dir: PathBuf,
    cache: RwLock<LruCache<String, TableData>>,
    /// Tables present on disk, tracked so `stats().on_disk_files` doesn't
    /// require a directory scan on every call.
    known_files: DashSet<String>,
    evictions: AtomicU64,
}

impl DiskBackend {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_capacity(dir, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(dir: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let known_files = DashSet::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                known_files.insert(stem.to_string());
            }
        }
        Ok(Self {
            dir,
            cache: RwLock::new(LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap())),
            known_files,
            evictions: AtomicU64::new(0),
        })
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.tbl"))
    }

    fn flush_one(&self, key: &str, data: &TableData) -> Result<()> {
        let encoded = bincode::serialize(data)?;
        std::fs::write(self.file_path(key), encoded)?;
        self.known_files.insert(key.to_string());
        Ok(())
    }

    fn read_one(&self, key: &str) -> Result<Option<TableData>> {
        let path = self.file_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        Ok(Some(bincode::deserialize(&bytes)?))
    }

    fn evict_if_needed(&self, key: String, data: TableData) -> Result<()> {
        let evicted = self.cache.write().push(key, data);
        if let Some((evicted_key, evicted_data)) = evicted {
            self.flush_one(&evicted_key, &evicted_data)?;
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl StorageBackend for DiskBackend {
    fn load_table(&self, tenant: &str, name: &str) -> Result<Option<TableData>> {
        let key = table_key(tenant, name);
        if let Some(data) = self.cache.write().get(&key).cloned() {
            return Ok(Some(data));
        }
        match self.read_one(&key)? {
            Some(data) => {
                self.evict_if_needed(key, data.clone())?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    fn save_table(&self, tenant: &str, name: &str, data: &TableData) -> Result<()> {
        let key = table_key(tenant, name);
        self.evict_if_needed(key, data.clone())
    }

    fn drop_table(&self, tenant: &str, name: &str) -> Result<()> {
        let key = table_key(tenant, name);
        self.cache.write().pop(&key);
        self.known_files.remove(&key);
        let path = self.file_path(&key);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let entries: Vec<(String, TableData)> =
            self.cache.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (key, data) in entries {
            self.flush_one(&key, &data)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.sync()
    }

    fn stats(&self) -> BackendStats {
        let cache = self.cache.read();
        let resident_bytes: u64 =
            cache.iter().map(|(_, v)| bincode::serialized_size(v).unwrap_or(0)).sum();
        BackendStats {
            cached_tables: cache.len(),
            resident_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
            on_disk_files: self.known_files.len(),
        }
    }
}

pub(crate) fn table_file_exists(dir: &Path, key: &str) -> bool {
    dir.join(format!("{key}.tbl")).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn test_save_then_load_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::open(dir.path()).unwrap();
        let data = TableData { schema: None, rows: vec![(1, vec![Value::Integer(9)])] };
        backend.save_table("acme", "t", &data).unwrap();
        let loaded = backend.load_table("acme", "t").unwrap().unwrap();
        assert_eq!(loaded.rows, data.rows);
    }

    #[test]
    fn test_eviction_flushes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::with_capacity(dir.path(), 1).unwrap();
        backend.save_table("acme", "a", &TableData::default()).unwrap();
        backend.save_table("acme", "b", &TableData::default()).unwrap();
        assert!(table_file_exists(dir.path(), &table_key("acme", "a")));
        assert_eq!(backend.stats().evictions, 1);
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::open(dir.path()).unwrap();
        backend.save_table("acme", "t", &TableData::default()).unwrap();
        backend.sync().unwrap();
        backend.drop_table("acme", "t").unwrap();
        assert!(!table_file_exists(dir.path(), &table_key("acme", "t")));
    }

    #[test]
    fn test_reopen_sees_persisted_tables() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = DiskBackend::open(dir.path()).unwrap();
            backend.save_table("acme", "t", &TableData::default()).unwrap();
            backend.close().unwrap();
        }
        let reopened = DiskBackend::open(dir.path()).unwrap();
        assert!(reopened.load_table("acme", "t").unwrap().is_some());
    }
}
