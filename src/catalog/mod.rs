//! Multi-tenant catalog: a named collection of per-tenant table registries.

pub mod registry;

pub use registry::{RegistrySnapshot, TableRegistry};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A tenant: a name plus its own table registry (spec §4.3 C4). Tenants
/// never see each other's tables; there is no cross-tenant query surface.
pub struct Tenant {
    pub name: String,
    pub registry: TableRegistry,
}

impl Tenant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: TableRegistry::new(),
        }
    }
}

/// On-disk/serialized shape of the full catalog, used by the snapshot codec.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// Tenant display name -> its registry snapshot.
    pub tenants: HashMap<String, RegistrySnapshot>,
}

/// Registry-of-registries: tenant name -> `Tenant`, with case-insensitive
/// tenant-name lookup to match the table-name convention within a tenant.
pub struct TenantStore {
    tenants: RwLock<HashMap<String, Arc<Tenant>>>,
}

impl TenantStore {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the tenant's registry, creating the tenant on first use.
    /// Tenants are implicit: there is no explicit `CREATE TENANT` statement
    /// (spec §4.3) — the first statement naming a tenant provisions it.
    pub fn get_or_create(&self, tenant_name: &str) -> Arc<Tenant> {
        let key = tenant_name.to_ascii_lowercase();
        if let Some(tenant) = self.tenants.read().get(&key) {
            return tenant.clone();
        }
        let mut tenants = self.tenants.write();
        tenants
            .entry(key)
            .or_insert_with(|| Arc::new(Tenant::new(tenant_name)))
            .clone()
    }

    pub fn get(&self, tenant_name: &str) -> Result<Arc<Tenant>> {
        self.tenants
            .read()
            .get(&tenant_name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| Error::catalog(format!("tenant '{tenant_name}' not found")))
    }

    pub fn list_tenants(&self) -> Vec<String> {
        self.tenants.read().values().map(|t| t.name.clone()).collect()
    }

    pub fn drop_tenant(&self, tenant_name: &str) -> Result<()> {
        self.tenants
            .write()
            .remove(&tenant_name.to_ascii_lowercase())
            .map(|_| ())
            .ok_or_else(|| Error::catalog(format!("tenant '{tenant_name}' not found")))
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        let tenants = self.tenants.read();
        let mut out = HashMap::with_capacity(tenants.len());
        for tenant in tenants.values() {
            out.insert(tenant.name.clone(), tenant.registry.snapshot());
        }
        CatalogSnapshot { tenants: out }
    }

    pub fn restore(&self, snapshot: CatalogSnapshot) {
        let mut tenants = self.tenants.write();
        tenants.clear();
        for (name, reg_snapshot) in snapshot.tenants {
            tenants.insert(
                name.to_ascii_lowercase(),
                Arc::new(Tenant {
                    name,
                    registry: TableRegistry::from_snapshot(reg_snapshot),
                }),
            );
        }
    }
}

impl Default for TenantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TableSchema;

    #[test]
    fn test_implicit_tenant_creation() {
        let store = TenantStore::new();
        let tenant = store.get_or_create("acme");
        tenant.registry.create_table(TableSchema::new("orders", vec![])).unwrap();
        assert!(store.get("ACME").unwrap().registry.table_exists("orders"));
    }

    #[test]
    fn test_tenant_isolation() {
        let store = TenantStore::new();
        let a = store.get_or_create("a");
        let b = store.get_or_create("b");
        a.registry.create_table(TableSchema::new("t", vec![])).unwrap();
        assert!(a.registry.table_exists("t"));
        assert!(!b.registry.table_exists("t"));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let store = TenantStore::new();
        store.get_or_create("acme").registry.create_table(TableSchema::new("orders", vec![])).unwrap();
        let snap = store.snapshot();

        let restored = TenantStore::new();
        restored.restore(snap);
        assert!(restored.get("acme").unwrap().registry.table_exists("orders"));
    }
}
