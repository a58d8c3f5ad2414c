//! The `Database` handle (spec §6): ties the tenant catalog, MVCC version
//! store/coordinator, storage backend, and query cache together behind the
//! library's `OpenDB`/`Execute`/`Begin`/`Commit`/`Abort`/`Close` surface.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use crate::cache::{CacheStats, QueryCache};
use crate::catalog::{CatalogSnapshot, TenantStore};
use crate::config::{DBConfig, StorageMode};
use crate::error::{Error, Result};
use crate::sql::executor::{QueryExecutor, QueryResult, TableAccess};
use crate::storage::{
    BackendStats, DiskBackend, HybridBackend, IndexOnlyBackend, MemoryBackend, StorageBackend, TableData,
    WalBackedBackend,
};
use crate::txn::coordinator::{IsolationLevel, TransactionContext, TransactionCoordinator, TransactionCoordinatorStats};
use crate::txn::mvcc::{SharedVersionStore, Timestamp, TransactionId, VersionStore, VersionStoreStats};
use crate::txn::wal::WalConfig;
use crate::types::{IndexDef, Row, RowId, TableSchema};

pub use crate::error::CancellationToken;

/// Combined resource usage across the storage backend, query cache, and
/// transaction subsystem (spec §4.4/§4.7 `Stats`).
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub backend: BackendStats,
    pub query_cache: CacheStats,
    pub transactions: TransactionCoordinatorStats,
    pub versions: VersionStoreStats,
}

pub struct Database {
    config: DBConfig,
    catalog: TenantStore,
    version_store: SharedVersionStore,
    coordinator: Arc<TransactionCoordinator>,
    backend: Arc<dyn StorageBackend>,
    query_cache: QueryCache,
    /// tenant::table -> live row ids, since the MVCC version store is keyed
    /// purely by row id with no notion of which table it belongs to.
    table_rows: DashMap<String, DashSet<RowId>>,
    row_id_gen: AtomicU64,
}

impl Database {
    /// `OpenDB(config)` (spec §6): builds the configured storage backend and,
    /// for persistent modes, reloads the catalog and every table's rows from
    /// it so the database resumes where it left off.
    pub fn open(config: DBConfig) -> Result<Self> {
        let backend: Arc<dyn StorageBackend> = match config.mode {
            StorageMode::Memory => {
                let snapshot_path = config.path.clone();
                match snapshot_path {
                    Some(p) => Arc::new(MemoryBackend::with_snapshot_path(p)),
                    None => Arc::new(MemoryBackend::new()),
                }
            }
            StorageMode::Wal => {
                let root = config
                    .path
                    .clone()
                    .ok_or_else(|| Error::catalog("WAL storage mode requires a path"))?;
                std::fs::create_dir_all(&root)?;
                let wal_config = WalConfig {
                    durability: config.durability.clone(),
                    checkpoint_every: config.checkpoint_every,
                    compress: config.compress_files,
                };
                Arc::new(WalBackedBackend::open(root.join("wal.log"), root.join("checkpoint.bin"), wal_config)?)
            }
            StorageMode::Disk => {
                let root = config.path.clone().ok_or_else(|| Error::catalog("Disk storage mode requires a path"))?;
                Arc::new(DiskBackend::open(root)?)
            }
            StorageMode::Index => {
                let root = config.path.clone().ok_or_else(|| Error::catalog("Index storage mode requires a path"))?;
                Arc::new(IndexOnlyBackend::open(root)?)
            }
            StorageMode::Hybrid => {
                let root = config.path.clone().ok_or_else(|| Error::catalog("Hybrid storage mode requires a path"))?;
                let budget = config.max_memory_bytes.unwrap_or(64 * 1024 * 1024);
                Arc::new(HybridBackend::open(root, budget)?)
            }
        };

        let catalog = TenantStore::new();
        // Memory mode's `path`, when set, names a single snapshot blob file
        // rather than a directory, so it has no sibling catalog.bin to load.
        if config.mode != StorageMode::Memory {
            if let Some(root) = &config.path {
                let catalog_path = root.join("catalog.bin");
                if catalog_path.exists() {
                    let bytes = std::fs::read(&catalog_path)?;
                    let snapshot: CatalogSnapshot = bincode::deserialize(&bytes)?;
                    catalog.restore(snapshot);
                }
            }
        }

        let version_store = Arc::new(VersionStore::new());
        let table_rows = DashMap::new();
        let mut max_row_id = 0u64;

        for tenant_name in catalog.list_tenants() {
            let tenant = catalog.get_or_create(&tenant_name);
            for table_name in tenant.registry.list_tables() {
                if let Some(data) = backend.load_table(&tenant_name, &table_name)? {
                    let key = crate::storage::table_key(&tenant_name, &table_name);
                    let row_ids = table_rows.entry(key).or_insert_with(DashSet::new);
                    for (row_id, row) in data.rows {
                        // txn_id 0 / begin_ts 0 marks rows that were already
                        // committed when the database was last closed.
                        version_store.insert_version(row_id, row, 0, 0)?;
                        row_ids.insert(row_id);
                        max_row_id = max_row_id.max(row_id);
                    }
                }
            }
        }

        let coordinator = Arc::new(TransactionCoordinator::new(version_store.clone()));
        let query_cache = QueryCache::new(config.query_cache_size.max(1));

        Ok(Self {
            config,
            catalog,
            version_store,
            coordinator,
            backend,
            query_cache,
            table_rows,
            row_id_gen: AtomicU64::new(max_row_id + 1),
        })
    }

    pub fn begin(&self, isolation_level: IsolationLevel, cancel: &CancellationToken) -> Result<TransactionId> {
        cancel.check()?;
        self.coordinator.begin(isolation_level)
    }

    pub fn commit(&self, txn_id: TransactionId, cancel: &CancellationToken) -> Result<Timestamp> {
        cancel.check()?;
        self.coordinator.commit(txn_id)
    }

    pub fn abort(&self, txn_id: TransactionId, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        self.coordinator.abort(txn_id)
    }

    /// `Execute(ctx, db, tenant, statement)` (spec §6): parses (via the
    /// query cache) and runs every statement in `sql` within the given
    /// transaction. A panic escaping execution is caught and converted to
    /// `Error::Internal` rather than unwinding into the caller (spec §7
    /// "panic-class errors"). `cancel` is polled at statement boundaries and
    /// threaded into the row pipeline so joins, aggregations, window
    /// partitions, and recursive CTE rounds can bail out mid-statement too.
    pub fn execute(
        &self,
        tenant: &str,
        txn_id: TransactionId,
        sql: &str,
        params: &[crate::types::Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<QueryResult>> {
        cancel.check()?;
        panic::catch_unwind(AssertUnwindSafe(|| self.execute_inner(tenant, txn_id, sql, params, cancel)))
            .unwrap_or_else(|_| Err(Error::internal("panic during query execution")))
    }

    fn execute_inner(
        &self,
        tenant: &str,
        txn_id: TransactionId,
        sql: &str,
        params: &[crate::types::Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<QueryResult>> {
        let compiled = self.query_cache.compile(sql)?;
        let ctx = self.coordinator.get_context(txn_id)?;
        let view = TransactionView { db: self, tenant: tenant.to_string(), ctx };
        let mut results = Vec::with_capacity(compiled.statements.len());
        for stmt in compiled.statements.iter() {
            cancel.check()?;
            let mut executor = QueryExecutor::new(&view, params, cancel, self.config.recursive_cte_limit);
            results.push(executor.execute(stmt)?);
        }
        Ok(results)
    }

    /// Convenience wrapper over `Begin`/`Execute`/`Commit`/`Abort` for
    /// callers that don't need multi-statement transactions.
    pub fn execute_autocommit(
        &self,
        tenant: &str,
        isolation_level: IsolationLevel,
        sql: &str,
        params: &[crate::types::Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<QueryResult>> {
        let txn_id = self.begin(isolation_level, cancel)?;
        match self.execute(tenant, txn_id, sql, params, cancel) {
            Ok(results) => {
                self.commit(txn_id, cancel)?;
                Ok(results)
            }
            Err(e) => {
                let _ = self.abort(txn_id, cancel);
                Err(e)
            }
        }
    }

    /// `SaveToFile(db, path)` (spec §6): a single binary blob carrying the
    /// catalog plus every tenant's tables and their currently-visible rows,
    /// independent of whatever storage backend this database is using.
    pub fn save_to_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        let mut tenant_tables = Vec::new();
        for tenant_name in self.catalog.list_tenants() {
            let tenant = self.catalog.get_or_create(&tenant_name);
            for table in tenant.registry.list_tables() {
                let schema = tenant.registry.get_table(&table).ok();
                let rows = self.live_rows(&tenant_name, &table);
                tenant_tables.push((tenant_name.clone(), table, TableData { schema, rows }));
            }
        }
        let snapshot = SnapshotFile { magic: SNAPSHOT_MAGIC, version: SNAPSHOT_VERSION, catalog: self.catalog.snapshot(), tenant_tables };
        let encoded = bincode::serialize(&snapshot)?;
        std::fs::write(path.into(), encoded)?;
        Ok(())
    }

    /// `LoadFromFile(path)` (spec §6): opens a fresh database per `config`
    /// and replays a snapshot written by `save_to_file` into it.
    pub fn load_from_file(path: impl Into<PathBuf>, config: DBConfig) -> Result<Self> {
        let db = Self::open(config)?;
        let bytes = std::fs::read(path.into())?;
        let snapshot: SnapshotFile = bincode::deserialize(&bytes)?;
        if snapshot.magic != SNAPSHOT_MAGIC {
            return Err(Error::catalog("not a tinysql snapshot file"));
        }
        db.catalog.restore(snapshot.catalog);
        for (tenant, table, data) in snapshot.tenant_tables {
            let key = crate::storage::table_key(&tenant, &table);
            let row_ids = db.table_rows.entry(key).or_insert_with(DashSet::new);
            for (row_id, row) in data.rows {
                db.version_store.insert_version(row_id, row, 0, 0)?;
                row_ids.insert(row_id);
                db.row_id_gen.fetch_max(row_id + 1, Ordering::SeqCst);
            }
        }
        Ok(db)
    }

    pub fn close(&self) -> Result<()> {
        if self.config.mode != StorageMode::Memory {
            if let Some(root) = &self.config.path {
                let encoded = bincode::serialize(&self.catalog.snapshot())?;
                std::fs::write(root.join("catalog.bin"), encoded)?;
            }
        }
        self.backend.close()
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            backend: self.backend.stats(),
            query_cache: self.query_cache.stats(),
            transactions: self.coordinator.stats(),
            versions: self.version_store.stats(),
        }
    }

    /// Every row of `tenant.table` visible as of right now, used by both
    /// `save_to_file` and per-table backend persistence.
    fn live_rows(&self, tenant: &str, table: &str) -> Vec<(RowId, Row)> {
        let key = crate::storage::table_key(tenant, table);
        let snapshot = crate::txn::mvcc::Snapshot {
            timestamp: self.version_store.stats().current_timestamp,
            active_txns: Default::default(),
        };
        match self.table_rows.get(&key) {
            Some(set) => set
                .iter()
                .filter_map(|row_id| {
                    self.version_store
                        .get_visible_version(*row_id, &snapshot)
                        .ok()
                        .flatten()
                        .map(|row| (*row_id, row))
                })
                .collect(),
            None => Vec::new(),
        }
    }

    fn persist_table(&self, tenant: &str, table: &str) -> Result<()> {
        let schema = self.catalog.get_or_create(tenant).registry.get_table(table).ok();
        let rows = self.live_rows(tenant, table);
        self.backend.save_table(tenant, table, &TableData { schema, rows })
    }
}

const SNAPSHOT_MAGIC: u32 = 0x54535143; // "TSQC"
const SNAPSHOT_VERSION: u32 = 1;

#[derive(serde::Serialize, serde::Deserialize)]
struct SnapshotFile {
    magic: u32,
    version: u32,
    catalog: CatalogSnapshot,
    tenant_tables: Vec<(String, String, TableData)>,
}

/// Per-transaction view handed to the executor: reads and writes go through
/// the MVCC coordinator, DDL goes straight to the tenant catalog (schema
/// changes are not MVCC-versioned in this engine).
struct TransactionView<'a> {
    db: &'a Database,
    tenant: String,
    ctx: Arc<TransactionContext>,
}

impl<'a> TransactionView<'a> {
    fn table_key(&self, table: &str) -> String {
        crate::storage::table_key(&self.tenant, table)
    }
}

impl<'a> TableAccess for TransactionView<'a> {
    fn schema(&self, table: &str) -> Result<TableSchema> {
        self.db.catalog.get_or_create(&self.tenant).registry.get_table(table)
    }

    fn scan(&self, table: &str) -> Result<Vec<(RowId, Row)>> {
        self.schema(table)?;
        let key = self.table_key(table);
        let mut out = Vec::new();
        if let Some(row_ids) = self.db.table_rows.get(&key) {
            for row_id in row_ids.iter() {
                if let Some(row) = self.db.coordinator.read(&self.ctx, *row_id)? {
                    out.push((*row_id, row));
                }
            }
        }
        Ok(out)
    }

    fn insert(&self, table: &str, row: Row) -> Result<RowId> {
        self.schema(table)?;
        let row_id = self.db.row_id_gen.fetch_add(1, Ordering::SeqCst);
        self.db.coordinator.stage_write(self.ctx.txn_id, table, row_id, Some(row))?;
        self.db
            .table_rows
            .entry(self.table_key(table))
            .or_insert_with(DashSet::new)
            .insert(row_id);
        Ok(row_id)
    }

    fn update(&self, table: &str, row_id: RowId, row: Row) -> Result<()> {
        self.schema(table)?;
        self.db.coordinator.stage_write(self.ctx.txn_id, table, row_id, Some(row))
    }

    fn delete(&self, table: &str, row_id: RowId) -> Result<()> {
        self.schema(table)?;
        self.db.coordinator.stage_write(self.ctx.txn_id, table, row_id, None)
    }

    fn create_table(&self, schema: TableSchema) -> Result<()> {
        self.db.catalog.get_or_create(&self.tenant).registry.create_table(schema)
    }

    fn drop_table(&self, table: &str, if_exists: bool) -> Result<()> {
        match self.db.catalog.get_or_create(&self.tenant).registry.drop_table(table) {
            Ok(()) => {
                self.db.table_rows.remove(&self.table_key(table));
                Ok(())
            }
            Err(_) if if_exists => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn create_index(&self, index: IndexDef) -> Result<()> {
        self.db.catalog.get_or_create(&self.tenant).registry.add_index(index)
    }

    fn drop_index(&self, index_name: &str) -> Result<()> {
        self.db.catalog.get_or_create(&self.tenant).registry.drop_index(index_name)
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.db.catalog.get_or_create(&self.tenant).registry.list_tables())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn test_create_insert_select_roundtrip() {
        let db = Database::open(DBConfig::for_testing()).unwrap();
        let results = db
            .execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "CREATE TABLE t (id INTEGER NOT NULL, name TEXT)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        assert_eq!(results.len(), 1);

        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "INSERT INTO t VALUES (1, 'a')",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "INSERT INTO t VALUES (2, 'b')",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();

        let results = db
            .execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "SELECT id, name FROM t ORDER BY id",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        let (columns, rows) = results[0].select_rows().unwrap();
        assert_eq!(columns, &["id".to_string(), "name".to_string()]);
        assert_eq!(rows, &[vec![Value::Integer(1), Value::Text("a".into())], vec![Value::Integer(2), Value::Text("b".into())]]);
    }

    #[test]
    fn test_aborted_transaction_leaves_no_trace() {
        let db = Database::open(DBConfig::for_testing()).unwrap();
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "CREATE TABLE t (id INTEGER)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();

        let txn = db.begin(IsolationLevel::ReadCommitted, &CancellationToken::none()).unwrap();
        db.execute("acme", txn, "INSERT INTO t VALUES (1)", &[], &CancellationToken::none()).unwrap();
        db.abort(txn, &CancellationToken::none()).unwrap();

        let results = db
            .execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "SELECT * FROM t",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        let (_, rows) = results[0].select_rows().unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_tenants_are_isolated() {
        let db = Database::open(DBConfig::for_testing()).unwrap();
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "CREATE TABLE t (id INTEGER)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        let err = db
            .execute_autocommit(
                "globex",
                IsolationLevel::ReadCommitted,
                "SELECT * FROM t",
                &[],
                &CancellationToken::none(),
            )
            .unwrap_err();
        assert_eq!(err.code(), "42P01");
    }

    #[test]
    fn test_save_and_reopen_persists_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        {
            let db = Database::open(DBConfig::for_disk(&path)).unwrap();
            db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "CREATE TABLE t (id INTEGER)",
                &[],
                &CancellationToken::none(),
            )
                .unwrap();
            db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "INSERT INTO t VALUES (42)",
                &[],
                &CancellationToken::none(),
            )
                .unwrap();
            db.persist_table("acme", "t").unwrap();
            db.close().unwrap();
        }

        let reopened = Database::open(DBConfig::for_disk(&path)).unwrap();
        let results = reopened
            .execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "SELECT id FROM t",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        let (_, rows) = results[0].select_rows().unwrap();
        assert_eq!(rows, &[vec![Value::Integer(42)]]);
    }

    #[test]
    fn test_save_to_file_then_load_from_file_roundtrip() {
        let db = Database::open(DBConfig::for_testing()).unwrap();
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "CREATE TABLE t (id INTEGER)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "INSERT INTO t VALUES (7)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("tinysql.snapshot");
        db.save_to_file(&snapshot_path).unwrap();

        let loaded = Database::load_from_file(&snapshot_path, DBConfig::for_testing()).unwrap();
        let results = loaded
            .execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "SELECT id FROM t",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        let (_, rows) = results[0].select_rows().unwrap();
        assert_eq!(rows, &[vec![Value::Integer(7)]]);
    }

    #[test]
    fn test_in_subquery() {
        let db = Database::open(DBConfig::for_testing()).unwrap();
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "CREATE TABLE orders (id INTEGER, customer_id INTEGER)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "CREATE TABLE vip_customers (id INTEGER)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        for row in ["(1, 10)", "(2, 20)", "(3, 30)"] {
            db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                &format!("INSERT INTO orders VALUES {row}"),
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        }
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "INSERT INTO vip_customers VALUES (10)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "INSERT INTO vip_customers VALUES (30)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();

        let results = db
            .execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "SELECT id FROM orders WHERE customer_id IN (SELECT id FROM vip_customers) ORDER BY id",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        let (_, rows) = results[0].select_rows().unwrap();
        assert_eq!(rows, &[vec![Value::Integer(1)], vec![Value::Integer(3)]]);
    }

    #[test]
    fn test_scalar_subquery_in_select_list() {
        let db = Database::open(DBConfig::for_testing()).unwrap();
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "CREATE TABLE t (id INTEGER)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "INSERT INTO t VALUES (1)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();

        let results = db
            .execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "SELECT id, (SELECT COUNT(*) FROM t) FROM t",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        let (_, rows) = results[0].select_rows().unwrap();
        assert_eq!(rows, &[vec![Value::Integer(1), Value::Integer(1)]]);
    }

    #[test]
    fn test_exists_subquery() {
        let db = Database::open(DBConfig::for_testing()).unwrap();
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "CREATE TABLE t (id INTEGER)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "CREATE TABLE empty_t (id INTEGER)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        db.execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "INSERT INTO t VALUES (1)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();

        let results = db
            .execute_autocommit(
                "acme",
                IsolationLevel::ReadCommitted,
                "SELECT id FROM t WHERE EXISTS (SELECT 1 FROM empty_t)",
                &[],
                &CancellationToken::none(),
            )
            .unwrap();
        let (_, rows) = results[0].select_rows().unwrap();
        assert!(rows.is_empty());
    }
}
