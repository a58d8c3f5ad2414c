//! Per-tenant table registry: schema storage with case-insensitive lookup.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{IndexDef, TableSchema};

/// Registry contents, as they round-trip through the snapshot codec.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Lowercased table name -> schema (schema.name preserves original case).
    pub tables: HashMap<String, TableSchema>,
    /// Lowercased index name -> table name.
    pub index_map: HashMap<String, String>,
}

/// A single tenant's table catalog (spec §4.3, component C4). Table-name
/// lookups are case-insensitive; `TableSchema::name` retains the
/// as-created casing for display purposes (`SHOW TABLES`, error messages).
pub struct TableRegistry {
    inner: RwLock<RegistrySnapshot>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistrySnapshot::default()),
        }
    }

    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let mut snapshot = snapshot;
        for schema in snapshot.tables.values_mut() {
            schema.rebuild_column_map();
        }
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.inner.read().clone()
    }

    /// Deep-clones the whole registry (spec §4.3 `DeepClone`), e.g. to give a
    /// transaction a consistent view of schema alongside its MVCC snapshot.
    pub fn deep_clone(&self) -> TableRegistry {
        TableRegistry::from_snapshot(self.snapshot())
    }

    pub fn create_table(&self, mut schema: TableSchema) -> Result<()> {
        let key = schema.name.to_ascii_lowercase();
        let mut inner = self.inner.write();
        if inner.tables.contains_key(&key) {
            return Err(Error::catalog(format!("table '{}' already exists", schema.name)));
        }
        for index in &schema.indexes {
            let idx_key = index.name.to_ascii_lowercase();
            if inner.index_map.contains_key(&idx_key) {
                return Err(Error::catalog(format!("index '{}' already exists", index.name)));
            }
        }
        schema.rebuild_column_map();
        for index in &schema.indexes {
            inner
                .index_map
                .insert(index.name.to_ascii_lowercase(), schema.name.clone());
        }
        inner.tables.insert(key, schema);
        Ok(())
    }

    pub fn drop_table(&self, table_name: &str) -> Result<()> {
        let key = table_name.to_ascii_lowercase();
        let mut inner = self.inner.write();
        let schema = inner
            .tables
            .remove(&key)
            .ok_or_else(|| Error::catalog(format!("table '{table_name}' not found")))?;
        for index in &schema.indexes {
            inner.index_map.remove(&index.name.to_ascii_lowercase());
        }
        Ok(())
    }

    pub fn get_table(&self, table_name: &str) -> Result<TableSchema> {
        self.inner
            .read()
            .tables
            .get(&table_name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| Error::catalog(format!("table '{table_name}' not found")))
    }

    /// Replaces a table's schema in place (used by ALTER-like operations that
    /// add an index or change nullability). Preserves the table's rows,
    /// since those live in the storage backend, not here.
    pub fn put_table(&self, schema: TableSchema) -> Result<()> {
        let key = schema.name.to_ascii_lowercase();
        let mut inner = self.inner.write();
        if !inner.tables.contains_key(&key) {
            return Err(Error::catalog(format!("table '{}' not found", schema.name)));
        }
        inner.tables.insert(key, schema);
        Ok(())
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.inner.read().tables.values().map(|s| s.name.clone()).collect()
    }

    pub fn table_exists(&self, table_name: &str) -> bool {
        self.inner.read().tables.contains_key(&table_name.to_ascii_lowercase())
    }

    pub fn add_index(&self, index: IndexDef) -> Result<()> {
        let mut inner = self.inner.write();
        let idx_key = index.name.to_ascii_lowercase();
        if inner.index_map.contains_key(&idx_key) {
            return Err(Error::catalog(format!("index '{}' already exists", index.name)));
        }
        let table_key = index.table_name.to_ascii_lowercase();
        let table = inner
            .tables
            .get_mut(&table_key)
            .ok_or_else(|| Error::catalog(format!("table '{}' not found", index.table_name)))?;
        for col in &index.columns {
            if table.get_column(col).is_none() {
                return Err(Error::catalog(format!(
                    "column '{col}' not found in table '{}'",
                    index.table_name
                )));
            }
        }
        table.add_index(index.clone());
        inner.index_map.insert(idx_key, index.table_name.clone());
        Ok(())
    }

    pub fn drop_index(&self, index_name: &str) -> Result<()> {
        let idx_key = index_name.to_ascii_lowercase();
        let mut inner = self.inner.write();
        let table_name = inner
            .index_map
            .remove(&idx_key)
            .ok_or_else(|| Error::catalog(format!("index '{index_name}' not found")))?;
        if let Some(table) = inner.tables.get_mut(&table_name.to_ascii_lowercase()) {
            table.indexes.retain(|idx| idx.name.to_ascii_lowercase() != idx_key);
        }
        Ok(())
    }

    pub fn get_index(&self, index_name: &str) -> Result<IndexDef> {
        let inner = self.inner.read();
        let table_name = inner
            .index_map
            .get(&index_name.to_ascii_lowercase())
            .ok_or_else(|| Error::catalog(format!("index '{index_name}' not found")))?;
        let table = inner
            .tables
            .get(&table_name.to_ascii_lowercase())
            .ok_or_else(|| Error::catalog(format!("table '{table_name}' not found")))?;
        table
            .indexes
            .iter()
            .find(|idx| idx.name.eq_ignore_ascii_case(index_name))
            .cloned()
            .ok_or_else(|| Error::catalog(format!("index '{index_name}' not found")))
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnDef, ColumnType, IndexType};

    #[test]
    fn test_create_and_get_table_case_insensitive() {
        let registry = TableRegistry::new();
        let schema = TableSchema::new(
            "Users",
            vec![
                ColumnDef::new("id", ColumnType::Integer, 0),
                ColumnDef::new("name", ColumnType::Text, 1),
            ],
        );
        registry.create_table(schema).unwrap();

        let retrieved = registry.get_table("USERS").unwrap();
        assert_eq!(retrieved.name, "Users");
        assert_eq!(retrieved.column_count(), 2);
        assert!(registry.table_exists("users"));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let registry = TableRegistry::new();
        registry.create_table(TableSchema::new("t", vec![])).unwrap();
        assert!(registry.create_table(TableSchema::new("T", vec![])).is_err());
    }

    #[test]
    fn test_drop_table() {
        let registry = TableRegistry::new();
        registry.create_table(TableSchema::new("test", vec![])).unwrap();
        assert!(registry.table_exists("test"));
        registry.drop_table("TEST").unwrap();
        assert!(!registry.table_exists("test"));
    }

    #[test]
    fn test_list_tables() {
        let registry = TableRegistry::new();
        registry.create_table(TableSchema::new("t1", vec![])).unwrap();
        registry.create_table(TableSchema::new("t2", vec![])).unwrap();
        let tables = registry.list_tables();
        assert_eq!(tables.len(), 2);
    }

    #[test]
    fn test_add_and_get_index() {
        let registry = TableRegistry::new();
        registry
            .create_table(TableSchema::new(
                "articles",
                vec![ColumnDef::new("title", ColumnType::Text, 0)],
            ))
            .unwrap();
        registry
            .add_index(IndexDef::new(
                "articles_title_idx",
                "articles",
                vec!["title".into()],
                IndexType::BTree,
            ))
            .unwrap();
        let idx = registry.get_index("ARTICLES_TITLE_IDX").unwrap();
        assert_eq!(idx.columns, vec!["title".to_string()]);
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let registry = TableRegistry::new();
        registry.create_table(TableSchema::new("t", vec![])).unwrap();
        let clone = registry.deep_clone();
        registry.drop_table("t").unwrap();
        assert!(!registry.table_exists("t"));
        assert!(clone.table_exists("t"));
    }
}
