//! Index-only backend (spec §4.4): only schemas are kept resident; row data
//! is always read from and written straight through to its per-table file,
//! giving the most aggressive eviction of the five flavors.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::{table_key, BackendStats, StorageBackend, TableData};
use crate::error::Result;
use crate::types::TableSchema;

pub struct IndexOnlyBackend {
    dir: PathBuf,
    schemas: DashMap<String, TableSchema>,
    reads: AtomicU64,
}

impl IndexOnlyBackend {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let schemas = DashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("tbl") {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            let data: TableData = bincode::deserialize(&bytes)?;
            if let Some(schema) = data.schema {
                if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                    schemas.insert(key.to_string(), schema);
                }
            }
        }
        Ok(Self { dir, schemas, reads: AtomicU64::new(0) })
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.tbl"))
    }
}

impl StorageBackend for IndexOnlyBackend {
    fn load_table(&self, tenant: &str, name: &str) -> Result<Option<TableData>> {
        let key = table_key(tenant, name);
        let path = self.file_path(&key);
        if !path.exists() {
            return Ok(None);
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        let bytes = std::fs::read(path)?;
        let data: TableData = bincode::deserialize(&bytes)?;
        if let Some(schema) = &data.schema {
            self.schemas.insert(key, schema.clone());
        }
        Ok(Some(data))
    }

    fn save_table(&self, tenant: &str, name: &str, data: &TableData) -> Result<()> {
        let key = table_key(tenant, name);
        if let Some(schema) = &data.schema {
            self.schemas.insert(key.clone(), schema.clone());
        }
        let encoded = bincode::serialize(data)?;
        std::fs::write(self.file_path(&key), encoded)?;
        Ok(())
    }

    fn drop_table(&self, tenant: &str, name: &str) -> Result<()> {
        let key = table_key(tenant, name);
        self.schemas.remove(&key);
        let path = self.file_path(&key);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        let on_disk_files = std::fs::read_dir(&self.dir).map(|iter| iter.count()).unwrap_or(0);
        BackendStats {
            cached_tables: self.schemas.len(),
            resident_bytes: self
                .schemas
                .iter()
                .map(|e| bincode::serialized_size(e.value()).unwrap_or(0))
                .sum(),
            evictions: self.reads.load(Ordering::Relaxed),
            on_disk_files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnDef, ColumnType, Value};

    fn schema() -> TableSchema {
        TableSchema::new("t", vec![ColumnDef::new("id", ColumnType::Integer, 0)])
    }

    #[test]
    fn test_save_then_load_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let backend = IndexOnlyBackend::open(dir.path()).unwrap();
        let data = TableData { schema: Some(schema()), rows: vec![(1, vec![Value::Integer(1)])] };
        backend.save_table("acme", "t", &data).unwrap();
        let loaded = backend.load_table("acme", "t").unwrap().unwrap();
        assert_eq!(loaded.rows, data.rows);
    }

    #[test]
    fn test_schema_resident_without_loading_rows() {
        let dir = tempfile::tempdir().unwrap();
        let backend = IndexOnlyBackend::open(dir.path()).unwrap();
        backend
            .save_table("acme", "t", &TableData { schema: Some(schema()), rows: vec![] })
            .unwrap();
        assert_eq!(backend.stats().cached_tables, 1);
    }

    #[test]
    fn test_drop_removes_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let backend = IndexOnlyBackend::open(dir.path()).unwrap();
        backend.save_table("acme", "t", &TableData { schema: Some(schema()), rows: vec![] }).unwrap();
        backend.drop_table("acme", "t").unwrap();
        assert!(backend.load_table("acme", "t").unwrap().is_none());
        assert_eq!(backend.stats().cached_tables, 0);
    }
}
