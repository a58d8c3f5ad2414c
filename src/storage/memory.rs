//! Memory backend (spec §4.4): everything lives in RAM. `sync` writes a
//! snapshot file if a path was configured; nothing survives process exit
//! otherwise.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::{table_key, BackendStats, StorageBackend, TableData};
use crate::error::Result;

pub struct MemoryBackend {
    tables: DashMap<String, TableData>,
    snapshot_path: Option<PathBuf>,
    evictions: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self { tables: DashMap::new(), snapshot_path: None, evictions: AtomicU64::new(0) }
    }

    pub fn with_snapshot_path(path: impl Into<PathBuf>) -> Self {
        Self { tables: DashMap::new(), snapshot_path: Some(path.into()), evictions: AtomicU64::new(0) }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn load_table(&self, tenant: &str, name: &str) -> Result<Option<TableData>> {
        Ok(self.tables.get(&table_key(tenant, name)).map(|entry| entry.value().clone()))
    }

    fn save_table(&self, tenant: &str, name: &str, data: &TableData) -> Result<()> {
        self.tables.insert(table_key(tenant, name), data.clone());
        Ok(())
    }

    fn drop_table(&self, tenant: &str, name: &str) -> Result<()> {
        self.tables.remove(&table_key(tenant, name));
        Ok(())
    }

    /// No-op unless a snapshot path was configured, in which case every
    /// table is serialized into one file (spec §4.4: "only by explicit
    /// snapshot").
    fn sync(&self) -> Result<()> {
        if let Some(path) = &self.snapshot_path {
            let snapshot: Vec<(String, TableData)> =
                self.tables.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
            let encoded = bincode::serialize(&snapshot)?;
            std::fs::write(path, encoded)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.sync()
    }

    fn stats(&self) -> BackendStats {
        let resident_bytes: u64 = self
            .tables
            .iter()
            .map(|e| bincode::serialized_size(e.value()).unwrap_or(0))
            .sum();
        BackendStats {
            cached_tables: self.tables.len(),
            resident_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
            on_disk_files: if self.snapshot_path.is_some() { 1 } else { 0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn test_save_then_load_is_identity() {
        let backend = MemoryBackend::new();
        let data = TableData { schema: None, rows: vec![(1, vec![Value::Integer(7)])] };
        backend.save_table("acme", "t", &data).unwrap();
        let loaded = backend.load_table("acme", "t").unwrap().unwrap();
        assert_eq!(loaded.rows, data.rows);
    }

    #[test]
    fn test_drop_removes_table() {
        let backend = MemoryBackend::new();
        backend.save_table("acme", "t", &TableData::default()).unwrap();
        backend.drop_table("acme", "t").unwrap();
        assert!(backend.load_table("acme", "t").unwrap().is_none());
    }

    #[test]
    fn test_case_insensitive_table_names() {
        let backend = MemoryBackend::new();
        backend.save_table("acme", "Users", &TableData::default()).unwrap();
        assert!(backend.load_table("acme", "users").unwrap().is_some());
    }

    #[test]
    fn test_sync_writes_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.bin");
        let backend = MemoryBackend::with_snapshot_path(&path);
        backend.save_table("acme", "t", &TableData::default()).unwrap();
        backend.sync().unwrap();
        assert!(path.exists());
    }
}
