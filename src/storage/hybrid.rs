//! Hybrid backend (spec §4.4): hot tables stay resident up to
//! `max_memory_bytes`, evicted LRU-across-tables once the byte budget is
//! exceeded; cold tables live in per-table files like the disk backend.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashSet;
use lru::LruCache;
use parking_lot::RwLock;

use super::{table_key, BackendStats, StorageBackend, TableData};
use crate::error::Result;

pub struct HybridBackend {
    dir: PathBuf,
    max_memory_bytes: u64,
    resident_bytes: AtomicU64,
    cache: RwLock<LruCache<String, TableData>>,
    known_files: DashSet<String>,
    evictions: AtomicU64,
}

impl HybridBackend {
    pub fn open(dir: impl Into<PathBuf>, max_memory_bytes: u64) -> Result<Self> {
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
            max_memory_bytes,
            resident_bytes: AtomicU64::new(0),
            cache: RwLock::new(LruCache::unbounded()),
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

    fn insert_and_evict(&self, key: String, data: TableData) -> Result<()> {
        let size = bincode::serialized_size(&data)?;
        let mut cache = self.cache.write();
        if let Some(old) = cache.put(key.clone(), data) {
            let old_size = bincode::serialized_size(&old)?;
            self.resident_bytes.fetch_sub(old_size.min(self.resident_bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
        }
        self.resident_bytes.fetch_add(size, Ordering::Relaxed);

        while self.resident_bytes.load(Ordering::Relaxed) > self.max_memory_bytes {
            let Some((evicted_key, evicted_data)) = cache.pop_lru() else { break };
            let evicted_size = bincode::serialized_size(&evicted_data).unwrap_or(0);
            drop(cache);
            self.flush_one(&evicted_key, &evicted_data)?;
            self.resident_bytes.fetch_sub(evicted_size.min(self.resident_bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            cache = self.cache.write();
        }
        Ok(())
    }
}

impl StorageBackend for HybridBackend {
    fn load_table(&self, tenant: &str, name: &str) -> Result<Option<TableData>> {
        let key = table_key(tenant, name);
        if let Some(data) = self.cache.write().get(&key).cloned() {
            return Ok(Some(data));
        }
        match self.read_one(&key)? {
            Some(data) => {
                self.insert_and_evict(key, data.clone())?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    fn save_table(&self, tenant: &str, name: &str, data: &TableData) -> Result<()> {
        let key = table_key(tenant, name);
        self.insert_and_evict(key, data.clone())
    }

    fn drop_table(&self, tenant: &str, name: &str) -> Result<()> {
        let key = table_key(tenant, name);
        if let Some(data) = self.cache.write().pop(&key) {
            let size = bincode::serialized_size(&data).unwrap_or(0);
            self.resident_bytes.fetch_sub(size.min(self.resident_bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
        }
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
        BackendStats {
            cached_tables: self.cache.read().len(),
            resident_bytes: self.resident_bytes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            on_disk_files: self.known_files.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn test_save_then_load_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let backend = HybridBackend::open(dir.path(), 1024 * 1024).unwrap();
        let data = TableData { schema: None, rows: vec![(1, vec![Value::Integer(4)])] };
        backend.save_table("acme", "t", &data).unwrap();
        let loaded = backend.load_table("acme", "t").unwrap().unwrap();
        assert_eq!(loaded.rows, data.rows);
    }

    #[test]
    fn test_evicts_when_over_byte_budget() {
        let dir = tempfile::tempdir().unwrap();
        let backend = HybridBackend::open(dir.path(), 32).unwrap();
        let big_row: crate::types::Row = (0..20).map(Value::Integer).collect();
        backend.save_table("acme", "a", &TableData { schema: None, rows: vec![(1, big_row.clone())] }).unwrap();
        backend.save_table("acme", "b", &TableData { schema: None, rows: vec![(2, big_row)] }).unwrap();
        assert!(backend.stats().evictions > 0);
        assert!(backend.stats().resident_bytes <= 32 || backend.stats().cached_tables <= 1);
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = HybridBackend::open(dir.path(), 1024).unwrap();
        backend.save_table("acme", "t", &TableData::default()).unwrap();
        backend.sync().unwrap();
        backend.drop_table("acme", "t").unwrap();
        assert!(backend.load_table("acme", "t").unwrap().is_none());
    }
}
