//! Core value and schema types shared across the engine.

pub mod table;
pub mod value;

pub use table::{ColumnDef, ColumnType, IndexDef, IndexType, TableSchema};
pub use value::{tribool_cmp, tribool_eq, Decimal, Geometry, Point, Tribool, Value};

/// A tuple of values in column order.
pub type Row = Vec<Value>;

/// Opaque per-row identifier, unique within a table's version chain.
pub type RowId = u64;
