//! Transaction coordinator (spec §4.6): begin/commit/abort lifecycle, write-
//! write conflict detection, and Serializable read-set validation on top of
//! the MVCC version store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use super::mvcc::{Snapshot, SharedVersionStore, Timestamp, TransactionId};
use crate::error::{Error, Result};
use crate::types::{Row, RowId};

/// Isolation level requested at `BEGIN` (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    SnapshotIsolation,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    Active = 0,
    Committed = 1,
    Aborted = 2,
}

/// A point a transaction can roll back to without aborting entirely: a
/// snapshot of the write/read sets at the time `SAVEPOINT name` ran.
struct SavepointState {
    name: String,
    write_set: HashMap<RowId, (String, Option<Row>)>,
    read_set: HashSet<RowId>,
}

/// Per-transaction working state: its snapshot, its pending writes (not yet
/// visible to anyone else), and the rows it has read (for Serializable
/// validation).
pub struct TransactionContext {
    pub txn_id: TransactionId,
    pub start_ts: Timestamp,
    pub isolation_level: IsolationLevel,
    pub state: AtomicU8,
    /// row id -> (table name, pending row data; None means a pending delete)
    pub write_set: RwLock<HashMap<RowId, (String, Option<Row>)>>,
    pub read_set: RwLock<HashSet<RowId>>,
    pub snapshot: Snapshot,
    savepoints: RwLock<Vec<SavepointState>>,
}

impl TransactionContext {
    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == TransactionState::Active as u8
    }

    pub fn record_read(&self, row_id: RowId) {
        self.read_set.write().insert(row_id);
    }
}

/// Coordinates transaction lifecycle over a shared version store. Holds one
/// lock per row currently being written by an in-progress transaction, so
/// write-write conflicts are caught the moment a second writer reaches the
/// row rather than only at commit time (spec §4.6).
pub struct TransactionCoordinator {
    version_store: SharedVersionStore,
    active_txns: DashMap<TransactionId, Arc<TransactionContext>>,
    /// row id -> transaction id currently holding a pending write on it.
    row_locks: DashMap<RowId, TransactionId>,
    txn_id_gen: AtomicU64,
}

impl TransactionCoordinator {
    pub fn new(version_store: SharedVersionStore) -> Self {
        Self {
            version_store,
            active_txns: DashMap::new(),
            row_locks: DashMap::new(),
            txn_id_gen: AtomicU64::new(1),
        }
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Result<TransactionId> {
        let txn_id = self.txn_id_gen.fetch_add(1, Ordering::SeqCst);
        let start_ts = self.version_store.allocate_timestamp();
        let active_txns: HashSet<TransactionId> =
            self.active_txns.iter().map(|entry| *entry.key()).collect();
        let snapshot = Snapshot { timestamp: start_ts, active_txns };

        let ctx = Arc::new(TransactionContext {
            txn_id,
            start_ts,
            isolation_level,
            state: AtomicU8::new(TransactionState::Active as u8),
            write_set: RwLock::new(HashMap::new()),
            read_set: RwLock::new(HashSet::new()),
            snapshot,
            savepoints: RwLock::new(Vec::new()),
        });
        self.active_txns.insert(txn_id, ctx);
        Ok(txn_id)
    }

    /// `SAVEPOINT name`: remembers the write/read set as of now so a later
    /// `ROLLBACK TO name` can undo everything staged since, without
    /// aborting the whole transaction.
    pub fn create_savepoint(&self, txn_id: TransactionId, name: String) -> Result<()> {
        let ctx = self.get_context(txn_id)?;
        if !ctx.is_active() {
            return Err(Error::internal(format!("transaction {txn_id} is not active")));
        }
        ctx.savepoints.write().push(SavepointState {
            name,
            write_set: ctx.write_set.read().clone(),
            read_set: ctx.read_set.read().clone(),
        });
        Ok(())
    }

    /// `ROLLBACK TO SAVEPOINT name`: restores the write/read set to what it
    /// was when the savepoint was created, releasing row locks for any
    /// writes undone in the process, and drops this savepoint and any later
    /// ones from the stack.
    pub fn rollback_to_savepoint(&self, txn_id: TransactionId, name: &str) -> Result<()> {
        let ctx = self.get_context(txn_id)?;
        if !ctx.is_active() {
            return Err(Error::internal(format!("transaction {txn_id} is not active")));
        }
        let mut savepoints = ctx.savepoints.write();
        let position = savepoints
            .iter()
            .position(|sp| sp.name == name)
            .ok_or_else(|| Error::catalog(format!("savepoint '{name}' not found")))?;

        let restored = savepoints[position].write_set.clone();
        let restored_reads = savepoints[position].read_set.clone();
        savepoints.truncate(position);
        drop(savepoints);

        let mut write_set = ctx.write_set.write();
        for row_id in write_set.keys() {
            if !restored.contains_key(row_id) {
                if let Some(holder) = self.row_locks.get(row_id) {
                    if *holder == txn_id {
                        drop(holder);
                        self.row_locks.remove(row_id);
                    }
                }
            }
        }
        *write_set = restored;
        *ctx.read_set.write() = restored_reads;
        Ok(())
    }

    /// `RELEASE SAVEPOINT name`: forgets the savepoint but keeps everything
    /// staged since it was created.
    pub fn release_savepoint(&self, txn_id: TransactionId, name: &str) -> Result<()> {
        let ctx = self.get_context(txn_id)?;
        if !ctx.is_active() {
            return Err(Error::internal(format!("transaction {txn_id} is not active")));
        }
        let mut savepoints = ctx.savepoints.write();
        let position = savepoints
            .iter()
            .position(|sp| sp.name == name)
            .ok_or_else(|| Error::catalog(format!("savepoint '{name}' not found")))?;
        savepoints.remove(position);
        Ok(())
    }

    /// Stages a write. Fails immediately with a write conflict if another
    /// in-progress transaction already holds a pending write on this row
    /// (spec §4.6: "the second to reach the row fails").
    pub fn stage_write(&self, txn_id: TransactionId, table: &str, row_id: RowId, data: Option<Row>) -> Result<()> {
        let ctx = self.get_context(txn_id)?;
        if !ctx.is_active() {
            return Err(Error::internal(format!("transaction {txn_id} is not active")));
        }

        match self.row_locks.entry(row_id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                if *entry.get() != txn_id {
                    return Err(Error::conflict(format!(
                        "write-write conflict on row {row_id}: held by transaction {}",
                        entry.get()
                    )));
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(txn_id);
            }
        }

        ctx.write_set.write().insert(row_id, (table.to_string(), data));
        Ok(())
    }

    /// Records a read for later Serializable validation and returns the row
    /// visible to this transaction's snapshot (checking its own pending
    /// writes first).
    pub fn read(&self, ctx: &TransactionContext, row_id: RowId) -> Result<Option<Row>> {
        ctx.record_read(row_id);
        if let Some((_, pending)) = ctx.write_set.read().get(&row_id) {
            return Ok(pending.clone());
        }
        self.version_store.get_visible_version(row_id, &ctx.snapshot)
    }

    /// Commits a transaction: validates (Serializable only), applies the
    /// write set to the version store, releases row locks, and reveals the
    /// new versions to future snapshots.
    pub fn commit(&self, txn_id: TransactionId) -> Result<Timestamp> {
        let ctx = self.get_context(txn_id)?;
        if !ctx.is_active() {
            return Err(Error::internal(format!("transaction {txn_id} is not active")));
        }

        self.validate_write_set(&ctx)?;
        let commit_ts = self.version_store.allocate_timestamp();

        let write_set = ctx.write_set.read();
        for (row_id, (_table, data)) in write_set.iter() {
            match data {
                Some(row) => self.version_store.update_version(*row_id, row.clone(), txn_id, commit_ts)?,
                None => self.version_store.delete_version(*row_id, txn_id, commit_ts)?,
            }
        }
        drop(write_set);

        self.release_locks(&ctx);
        ctx.state.store(TransactionState::Committed as u8, Ordering::Release);
        self.active_txns.remove(&txn_id);
        Ok(commit_ts)
    }

    pub fn abort(&self, txn_id: TransactionId) -> Result<()> {
        let ctx = self.get_context(txn_id)?;
        ctx.write_set.write().clear();
        self.release_locks(&ctx);
        ctx.state.store(TransactionState::Aborted as u8, Ordering::Release);
        self.active_txns.remove(&txn_id);
        Ok(())
    }

    fn release_locks(&self, ctx: &TransactionContext) {
        for row_id in ctx.write_set.read().keys() {
            if let Some(holder) = self.row_locks.get(row_id) {
                if *holder == ctx.txn_id {
                    drop(holder);
                    self.row_locks.remove(row_id);
                }
            }
        }
    }

    pub fn get_context(&self, txn_id: TransactionId) -> Result<Arc<TransactionContext>> {
        self.active_txns
            .get(&txn_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::internal(format!("transaction {txn_id} not found")))
    }

    /// Serializable validation (spec §4.6): fail commit if any row this
    /// transaction read has a version created after its snapshot was taken
    /// by a transaction other than itself — someone else wrote it out from
    /// under us.
    fn validate_write_set(&self, ctx: &TransactionContext) -> Result<()> {
        if ctx.isolation_level != IsolationLevel::Serializable {
            return Ok(());
        }
        let read_set = ctx.read_set.read();
        for row_id in read_set.iter() {
            let latest = self.version_store.latest_begin_ts(*row_id);
            if latest > ctx.start_ts {
                return Err(Error::conflict(format!(
                    "serialization failure: row {row_id} was modified after transaction {} took its snapshot",
                    ctx.txn_id
                )));
            }
        }
        Ok(())
    }

    pub fn get_min_active_timestamp(&self) -> Timestamp {
        self.active_txns
            .iter()
            .map(|entry| entry.value().start_ts)
            .min()
            .unwrap_or_else(|| self.version_store.allocate_timestamp())
    }

    pub fn stats(&self) -> TransactionCoordinatorStats {
        let next_txn_id = self.txn_id_gen.load(Ordering::Relaxed);
        let active = self.active_txns.len() as u64;
        let total_committed = if next_txn_id > 1 { (next_txn_id - 1) - active } else { 0 };
        TransactionCoordinatorStats { active_transactions: active, total_committed }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionCoordinatorStats {
    pub active_transactions: u64,
    pub total_committed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord() -> TransactionCoordinator {
        TransactionCoordinator::new(Arc::new(super::super::mvcc::VersionStore::new()))
    }

    #[test]
    fn test_begin_transaction() {
        let c = coord();
        let txn = c.begin(IsolationLevel::ReadCommitted).unwrap();
        let ctx = c.get_context(txn).unwrap();
        assert_eq!(ctx.txn_id, txn);
        assert_eq!(ctx.isolation_level, IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_commit_transaction() {
        let c = coord();
        let txn = c.begin(IsolationLevel::ReadCommitted).unwrap();
        c.stage_write(txn, "t", 1, Some(vec![crate::types::Value::Integer(1)])).unwrap();
        c.commit(txn).unwrap();
        assert!(c.get_context(txn).is_err());
    }

    #[test]
    fn test_abort_transaction() {
        let c = coord();
        let txn = c.begin(IsolationLevel::ReadCommitted).unwrap();
        c.stage_write(txn, "t", 1, Some(vec![crate::types::Value::Integer(1)])).unwrap();
        c.abort(txn).unwrap();
        assert!(c.get_context(txn).is_err());
    }

    #[test]
    fn test_write_write_conflict() {
        let c = coord();
        let t1 = c.begin(IsolationLevel::ReadCommitted).unwrap();
        let t2 = c.begin(IsolationLevel::ReadCommitted).unwrap();
        c.stage_write(t1, "t", 1, Some(vec![crate::types::Value::Integer(1)])).unwrap();
        let err = c.stage_write(t2, "t", 1, Some(vec![crate::types::Value::Integer(2)])).unwrap_err();
        assert_eq!(err.code(), "40001");
    }

    #[test]
    fn test_lock_released_after_commit_allows_next_writer() {
        let c = coord();
        let t1 = c.begin(IsolationLevel::ReadCommitted).unwrap();
        c.stage_write(t1, "t", 1, Some(vec![crate::types::Value::Integer(1)])).unwrap();
        c.commit(t1).unwrap();

        let t2 = c.begin(IsolationLevel::ReadCommitted).unwrap();
        assert!(c.stage_write(t2, "t", 1, Some(vec![crate::types::Value::Integer(2)])).is_ok());
    }

    #[test]
    fn test_serializable_validation_fails_on_concurrent_write() {
        let c = coord();
        let t1 = c.begin(IsolationLevel::Serializable).unwrap();
        let ctx1 = c.get_context(t1).unwrap();
        c.read(&ctx1, 1).unwrap();

        let t2 = c.begin(IsolationLevel::ReadCommitted).unwrap();
        c.stage_write(t2, "t", 1, Some(vec![crate::types::Value::Integer(9)])).unwrap();
        c.commit(t2).unwrap();

        let err = c.commit(t1).unwrap_err();
        assert_eq!(err.code(), "40001");
    }

    #[test]
    fn test_snapshot_isolation_active_set() {
        let c = coord();
        let t1 = c.begin(IsolationLevel::RepeatableRead).unwrap();
        let t2 = c.begin(IsolationLevel::RepeatableRead).unwrap();
        let ctx1 = c.get_context(t1).unwrap();
        let ctx2 = c.get_context(t2).unwrap();
        assert!(!ctx1.snapshot.active_txns.contains(&t2));
        assert!(ctx2.snapshot.active_txns.contains(&t1));
    }

    #[test]
    fn test_savepoint_rollback_undoes_writes() {
        let c = coord();
        let txn = c.begin(IsolationLevel::ReadCommitted).unwrap();
        c.stage_write(txn, "t", 1, Some(vec![crate::types::Value::Integer(1)])).unwrap();
        c.create_savepoint(txn, "sp1".into()).unwrap();
        c.stage_write(txn, "t", 2, Some(vec![crate::types::Value::Integer(2)])).unwrap();

        c.rollback_to_savepoint(txn, "sp1").unwrap();
        let ctx = c.get_context(txn).unwrap();
        assert!(ctx.write_set.read().contains_key(&1));
        assert!(!ctx.write_set.read().contains_key(&2));

        // Row 2's lock was released, so another transaction can claim it.
        let other = c.begin(IsolationLevel::ReadCommitted).unwrap();
        assert!(c.stage_write(other, "t", 2, Some(vec![crate::types::Value::Integer(9)])).is_ok());
    }

    #[test]
    fn test_release_savepoint_keeps_writes() {
        let c = coord();
        let txn = c.begin(IsolationLevel::ReadCommitted).unwrap();
        c.create_savepoint(txn, "sp1".into()).unwrap();
        c.stage_write(txn, "t", 1, Some(vec![crate::types::Value::Integer(1)])).unwrap();
        c.release_savepoint(txn, "sp1").unwrap();
        let ctx = c.get_context(txn).unwrap();
        assert!(ctx.write_set.read().contains_key(&1));
        assert!(c.rollback_to_savepoint(txn, "sp1").is_err());
    }
}
