//! Transaction management: MVCC version storage, the coordinator that
//! tracks active transactions and enforces isolation, and the write-ahead
//! log that makes commits durable (spec §4.5, §4.6, components C6, C7).

pub mod coordinator;
pub mod mvcc;
pub mod wal;

pub use coordinator::{IsolationLevel, TransactionContext, TransactionCoordinator, TransactionCoordinatorStats, TransactionState};
pub use mvcc::{Snapshot, SharedVersionStore, Timestamp, TransactionId, VersionStore, VersionStoreStats};
pub use wal::{LogSequenceNumber, Wal, WalConfig, WalRecord};
