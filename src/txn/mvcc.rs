//! MVCC version store (spec §4.6, component C7): version chains per row,
//! visibility governed by a transaction's snapshot.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::Result;
use crate::types::{Row, RowId};

pub type TransactionId = u64;
pub type Timestamp = u64;

/// Snapshot a transaction reads through: a timestamp plus the set of
/// transactions still in progress when the snapshot was taken.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub timestamp: Timestamp,
    pub active_txns: HashSet<TransactionId>,
}

/// One version of a row, linked to the next-older version.
pub struct RowVersion {
    pub data: Row,
    pub txn_id: TransactionId,
    pub begin_ts: Timestamp,
    /// 0 means "still the current version" (not yet superseded or deleted).
    pub end_ts: AtomicU64,
    pub deleted: AtomicBool,
    pub next: Option<Box<RowVersion>>,
}

struct VersionChain {
    head: RwLock<Option<Box<RowVersion>>>,
    version_count: AtomicU64,
}

impl VersionChain {
    fn new() -> Self {
        Self { head: RwLock::new(None), version_count: AtomicU64::new(0) }
    }

    fn prepend(&self, mut new_version: Box<RowVersion>) {
        let mut head = self.head.write();
        new_version.next = head.take();
        *head = Some(new_version);
        self.version_count.fetch_add(1, Ordering::Relaxed);
    }

    fn vacuum(&self, min_timestamp: Timestamp) -> usize {
        let mut head = self.head.write();
        let mut removed = 0;
        if let Some(first) = head.as_mut() {
            removed += Self::vacuum_chain(&mut first.next, min_timestamp);
        }
        if removed > 0 {
            self.version_count.fetch_sub(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    fn vacuum_chain(next: &mut Option<Box<RowVersion>>, min_timestamp: Timestamp) -> usize {
        let mut removed = 0;
        while let Some(version) = next {
            let end_ts = version.end_ts.load(Ordering::Acquire);
            if end_ts != 0 && end_ts < min_timestamp {
                *next = version.next.take();
                removed += 1;
            } else {
                removed += Self::vacuum_chain(&mut version.next, min_timestamp);
                break;
            }
        }
        removed
    }
}

/// Version store: row id -> version chain, plus the logical clock that
/// hands out both transaction start timestamps and commit timestamps.
pub struct VersionStore {
    versions: DashMap<RowId, VersionChain>,
    timestamp_gen: AtomicU64,
}

impl VersionStore {
    pub fn new() -> Self {
        Self { versions: DashMap::new(), timestamp_gen: AtomicU64::new(1) }
    }

    pub fn allocate_timestamp(&self) -> Timestamp {
        self.timestamp_gen.fetch_add(1, Ordering::SeqCst)
    }

    pub fn insert_version(&self, row_id: RowId, data: Row, txn_id: TransactionId, timestamp: Timestamp) -> Result<()> {
        let new_version = Box::new(RowVersion {
            data,
            txn_id,
            begin_ts: timestamp,
            end_ts: AtomicU64::new(0),
            deleted: AtomicBool::new(false),
            next: None,
        });
        self.versions.entry(row_id).or_insert_with(VersionChain::new).prepend(new_version);
        Ok(())
    }

    pub fn update_version(&self, row_id: RowId, new_data: Row, txn_id: TransactionId, timestamp: Timestamp) -> Result<()> {
        if let Some(chain) = self.versions.get(&row_id) {
            if let Some(old) = chain.head.read().as_ref() {
                old.end_ts.store(timestamp, Ordering::Release);
            }
        }
        self.insert_version(row_id, new_data, txn_id, timestamp)
    }

    pub fn delete_version(&self, row_id: RowId, txn_id: TransactionId, timestamp: Timestamp) -> Result<()> {
        let chain = self.versions.entry(row_id).or_insert_with(VersionChain::new);
        if let Some(version) = chain.head.read().as_ref() {
            version.end_ts.store(timestamp, Ordering::Release);
        }
        chain.prepend(Box::new(RowVersion {
            data: Vec::new(),
            txn_id,
            begin_ts: timestamp,
            end_ts: AtomicU64::new(0),
            deleted: AtomicBool::new(true),
            next: None,
        }));
        Ok(())
    }

    /// The row version visible to `snapshot`, per spec §4.6: the newest
    /// version whose creator committed at or before the snapshot and whose
    /// deleter (if any) committed after it.
    pub fn get_visible_version(&self, row_id: RowId, snapshot: &Snapshot) -> Result<Option<Row>> {
        let chain = match self.versions.get(&row_id) {
            Some(c) => c,
            None => return Ok(None),
        };
        let head = chain.head.read();
        let mut current = head.as_deref();
        while let Some(version) = current {
            if self.is_visible(version, snapshot) {
                return Ok(if version.deleted.load(Ordering::Acquire) { None } else { Some(version.data.clone()) });
            }
            current = version.next.as_deref();
        }
        Ok(None)
    }

    /// The highest `begin_ts` of any version of this row, or 0 if the row
    /// has no versions. Used by Serializable commit validation to detect
    /// whether a row read during the transaction has since been written by
    /// someone else.
    pub fn latest_begin_ts(&self, row_id: RowId) -> Timestamp {
        match self.versions.get(&row_id) {
            Some(chain) => chain.head.read().as_ref().map(|v| v.begin_ts).unwrap_or(0),
            None => 0,
        }
    }

    fn is_visible(&self, version: &RowVersion, snapshot: &Snapshot) -> bool {
        if version.begin_ts > snapshot.timestamp {
            return false;
        }
        let end_ts = version.end_ts.load(Ordering::Acquire);
        if end_ts != 0 && end_ts <= snapshot.timestamp {
            return false;
        }
        if snapshot.active_txns.contains(&version.txn_id) {
            return false;
        }
        true
    }

    pub fn stats(&self) -> VersionStoreStats {
        let mut total_versions = 0u64;
        let mut total_chains = 0u64;
        let mut max_chain_length = 0u64;
        for entry in self.versions.iter() {
            total_chains += 1;
            let len = entry.value().version_count.load(Ordering::Relaxed);
            total_versions += len;
            max_chain_length = max_chain_length.max(len);
        }
        VersionStoreStats {
            total_rows: total_chains,
            total_versions,
            avg_versions_per_row: if total_chains > 0 { total_versions as f64 / total_chains as f64 } else { 0.0 },
            max_chain_length,
            current_timestamp: self.timestamp_gen.load(Ordering::Relaxed),
        }
    }

    /// Reclaims versions no longer visible to any live transaction (spec
    /// §4.6 garbage collection).
    pub fn vacuum(&self, min_active_timestamp: Timestamp) -> Result<usize> {
        let mut removed = 0;
        for mut entry in self.versions.iter_mut() {
            removed += entry.value_mut().vacuum(min_active_timestamp);
        }
        Ok(removed)
    }
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct VersionStoreStats {
    pub total_rows: u64,
    pub total_versions: u64,
    pub avg_versions_per_row: f64,
    pub max_chain_length: u64,
    pub current_timestamp: Timestamp,
}

/// Shared handle, since both the coordinator and a database's per-tenant
/// views need to reach the same version store.
pub type SharedVersionStore = Arc<VersionStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn test_insert_and_read_single_version() {
        let store = VersionStore::new();
        store.insert_version(1, vec![Value::Integer(100)], 1, 10).unwrap();
        let snapshot = Snapshot { timestamp: 15, active_txns: HashSet::new() };
        assert_eq!(store.get_visible_version(1, &snapshot).unwrap(), Some(vec![Value::Integer(100)]));
    }

    #[test]
    fn test_multi_version_isolation() {
        let store = VersionStore::new();
        store.insert_version(1, vec![Value::Integer(100)], 1, 10).unwrap();
        store.update_version(1, vec![Value::Integer(200)], 2, 20).unwrap();

        let old = Snapshot { timestamp: 15, active_txns: HashSet::new() };
        assert_eq!(store.get_visible_version(1, &old).unwrap(), Some(vec![Value::Integer(100)]));

        let new = Snapshot { timestamp: 25, active_txns: HashSet::new() };
        assert_eq!(store.get_visible_version(1, &new).unwrap(), Some(vec![Value::Integer(200)]));
    }

    #[test]
    fn test_uncommitted_transaction_invisible() {
        let store = VersionStore::new();
        store.insert_version(1, vec![Value::Integer(100)], 1, 10).unwrap();
        let mut active = HashSet::new();
        active.insert(1);
        let snapshot = Snapshot { timestamp: 15, active_txns: active };
        assert_eq!(store.get_visible_version(1, &snapshot).unwrap(), None);
    }

    #[test]
    fn test_delete_version() {
        let store = VersionStore::new();
        store.insert_version(1, vec![Value::Integer(100)], 1, 10).unwrap();
        store.delete_version(1, 2, 20).unwrap();

        let before = Snapshot { timestamp: 15, active_txns: HashSet::new() };
        assert_eq!(store.get_visible_version(1, &before).unwrap(), Some(vec![Value::Integer(100)]));

        let after = Snapshot { timestamp: 25, active_txns: HashSet::new() };
        assert_eq!(store.get_visible_version(1, &after).unwrap(), None);
    }

    #[test]
    fn test_vacuum_old_versions() {
        let store = VersionStore::new();
        store.insert_version(1, vec![Value::Integer(100)], 1, 10).unwrap();
        store.update_version(1, vec![Value::Integer(200)], 2, 20).unwrap();
        store.update_version(1, vec![Value::Integer(300)], 3, 30).unwrap();
        assert_eq!(store.stats().total_versions, 3);
        let removed = store.vacuum(25).unwrap();
        assert!(removed > 0);
        assert!(store.stats().total_versions < 3);
    }
}
