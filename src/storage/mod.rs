//! Storage backends (spec §4.4, component C5): one contract, five
//! materializations chosen by `config::StorageMode`.

pub mod checksum;
pub mod disk;
pub mod hybrid;
pub mod index_only;
pub mod memory;
pub mod wal_backed;

pub use checksum::{Checksum, ChecksumError, ChecksumType};
pub use disk::DiskBackend;
pub use hybrid::HybridBackend;
pub use index_only::IndexOnlyBackend;
pub use memory::MemoryBackend;
pub use wal_backed::WalBackedBackend;

use crate::error::Result;
use crate::types::{RowId, TableSchema};

/// A table's full materialized content: its schema plus every live row,
/// keyed by the row id the MVCC layer assigned it.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TableData {
    pub schema: Option<TableSchema>,
    pub rows: Vec<(RowId, crate::types::Row)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub cached_tables: usize,
    pub resident_bytes: u64,
    pub evictions: u64,
    pub on_disk_files: usize,
}

/// The contract every storage flavor implements (spec §4.4). `LoadTable`
/// followed by `SaveTable` with the returned value must be an identity;
/// `DropTable` must remove both in-memory and on-disk state atomically from
/// the caller's perspective.
pub trait StorageBackend: Send + Sync {
    fn load_table(&self, tenant: &str, name: &str) -> Result<Option<TableData>>;
    fn save_table(&self, tenant: &str, name: &str, data: &TableData) -> Result<()>;
    fn drop_table(&self, tenant: &str, name: &str) -> Result<()>;
    fn sync(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
    fn stats(&self) -> BackendStats;
}

pub(crate) fn table_key(tenant: &str, name: &str) -> String {
    format!("{tenant}::{}", name.to_ascii_lowercase())
}
