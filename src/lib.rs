//! TinySQL: an embeddable, multi-tenant relational engine with a SQL front
//! end, MVCC transactions, a write-ahead log, and pluggable storage
//! backends (spec §1-§9).

pub mod cache;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod sql;
pub mod storage;
pub mod txn;
pub mod types;

pub use config::{DBConfig, Dsn, DsnResolved, DurabilityLevel, StorageMode};
pub use database::{CancellationToken, Database, DatabaseStats};
pub use error::{Error, Result};
pub use sql::parse_sql;
pub use txn::coordinator::IsolationLevel;
pub use types::{ColumnDef, ColumnType, Row, RowId, TableSchema, Value};
