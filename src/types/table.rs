//! Table and column schema definitions (spec §3, §4.3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::value::Value;

/// Declared column type. Integer/float widths are carried here (not as
/// separate `Value` variants) so coercion bounds-checking lives in one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    Boolean,
    Text,
    Blob,
    Date,
    Time,
    Timestamp,
    Json,
    Uuid,
    Interval,
    Geometry,
}

impl ColumnType {
    /// Inclusive bounds for the integer-family types, used at insert-time
    /// coercion to reject out-of-range literals rather than silently wrap.
    pub fn integer_bounds(&self) -> Option<(i64, i64)> {
        match self {
            ColumnType::TinyInt => Some((i8::MIN as i64, i8::MAX as i64)),
            ColumnType::SmallInt => Some((i16::MIN as i64, i16::MAX as i64)),
            ColumnType::Integer => Some((i32::MIN as i64, i32::MAX as i64)),
            ColumnType::BigInt => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    pub fn is_integer_family(&self) -> bool {
        matches!(
            self,
            ColumnType::TinyInt | ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt
        )
    }

    pub fn is_numeric_family(&self) -> bool {
        self.is_integer_family()
            || matches!(self, ColumnType::Float | ColumnType::Double | ColumnType::Decimal { .. })
    }

    /// Checks that `value` is compatible with this column type, allowing the
    /// usual int->float and int-literal->decimal widenings.
    pub fn accepts(&self, value: &Value) -> bool {
        if matches!(value, Value::Null) {
            return true;
        }
        match (self, value) {
            (t, Value::Integer(_)) if t.is_integer_family() => true,
            (ColumnType::Float, Value::Integer(_)) | (ColumnType::Float, Value::Float(_)) => true,
            (ColumnType::Double, Value::Integer(_)) | (ColumnType::Double, Value::Float(_)) => true,
            (ColumnType::Decimal { .. }, Value::Integer(_)) => true,
            (ColumnType::Decimal { .. }, Value::Decimal(_)) => true,
            (ColumnType::Boolean, Value::Bool(_)) => true,
            (ColumnType::Text, Value::Text(_)) => true,
            (ColumnType::Blob, Value::Blob(_)) => true,
            (ColumnType::Date, Value::Date(_)) => true,
            (ColumnType::Time, Value::Time(_)) => true,
            (ColumnType::Timestamp, Value::Timestamp(_)) => true,
            (ColumnType::Json, Value::Json(_)) => true,
            (ColumnType::Uuid, Value::Uuid(_)) => true,
            (ColumnType::Interval, Value::Interval(_)) => true,
            (ColumnType::Geometry, Value::Geometry(_)) => true,
            _ => false,
        }
    }
}

/// Column definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    /// Position in the row tuple (0-indexed).
    pub position: usize,
    pub nullable: bool,
    pub default: Option<Value>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, col_type: ColumnType, position: usize) -> Self {
        Self {
            name: name.into(),
            col_type,
            position,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Supported index kinds (spec §4.3: the catalog tracks index metadata; the
/// execution engine need not exploit every kind for access-path selection,
/// since cost-based planning is out of scope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexType {
    BTree,
    Unique,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub table_name: String,
    pub columns: Vec<String>,
    pub index_type: IndexType,
}

impl IndexDef {
    pub fn new(
        name: impl Into<String>,
        table_name: impl Into<String>,
        columns: Vec<String>,
        index_type: IndexType,
    ) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            columns,
            index_type,
        }
    }
}

/// A table's schema: ordered columns plus a case-insensitive name lookup,
/// matching the tenant catalog's case-insensitive table-name convention
/// (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
    pub primary_key: Option<Vec<String>>,
    #[serde(skip)]
    column_map: HashMap<String, usize>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        let mut schema = Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
            primary_key: None,
            column_map: HashMap::new(),
        };
        schema.rebuild_column_map();
        schema
    }

    pub fn with_primary_key(mut self, columns: Vec<String>) -> Self {
        self.primary_key = Some(columns);
        self
    }

    pub fn add_index(&mut self, index: IndexDef) {
        self.indexes.push(index);
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.column_map
            .get(&name.to_ascii_lowercase())
            .map(|&pos| &self.columns[pos])
    }

    pub fn get_column_position(&self, name: &str) -> Option<usize> {
        self.column_map.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Must be called after deserialization, since `column_map` is not
    /// persisted (it is a derived index, not source-of-truth state).
    pub fn rebuild_column_map(&mut self) {
        self.column_map.clear();
        for col in &self.columns {
            self.column_map.insert(col.name.to_ascii_lowercase(), col.position);
        }
    }

    /// Validates and coerces a full row against this schema, in column order.
    pub fn validate_row(&self, row: &[Value]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::constraint(format!(
                "column count mismatch: expected {}, got {}",
                self.columns.len(),
                row.len()
            )));
        }
        for (i, col) in self.columns.iter().enumerate() {
            let value = &row[i];
            if value.is_null() && !col.nullable {
                return Err(Error::constraint(format!("column '{}' cannot be null", col.name)));
            }
            if !col.col_type.accepts(value) {
                return Err(Error::ty(format!(
                    "type mismatch for column '{}': expected {:?}, got {}",
                    col.name,
                    col.col_type,
                    value.type_name()
                )));
            }
            if let Some((lo, hi)) = col.col_type.integer_bounds() {
                if let Value::Integer(v) = value {
                    if *v < lo || *v > hi {
                        return Err(Error::constraint(format!(
                            "value {v} out of range for column '{}' ({:?})",
                            col.name, col.col_type
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_def_not_null() {
        let col = ColumnDef::new("id", ColumnType::Integer, 0).not_null();
        assert_eq!(col.name, "id");
        assert_eq!(col.position, 0);
        assert!(!col.nullable);
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let schema = TableSchema::new(
            "Users",
            vec![
                ColumnDef::new("Id", ColumnType::Integer, 0).not_null(),
                ColumnDef::new("Name", ColumnType::Text, 1),
            ],
        );
        assert_eq!(schema.get_column_position("id"), Some(0));
        assert_eq!(schema.get_column_position("NAME"), Some(1));
        assert!(schema.get_column("missing").is_none());
    }

    #[test]
    fn test_validate_row() {
        let schema = TableSchema::new(
            "test",
            vec![
                ColumnDef::new("id", ColumnType::Integer, 0).not_null(),
                ColumnDef::new("name", ColumnType::Text, 1),
            ],
        );
        let row = vec![Value::Integer(1), Value::Text("a".into())];
        assert!(schema.validate_row(&row).is_ok());

        let bad = vec![Value::Null, Value::Text("a".into())];
        assert!(schema.validate_row(&bad).is_err());

        let wrong_count = vec![Value::Integer(1)];
        assert!(schema.validate_row(&wrong_count).is_err());
    }

    #[test]
    fn test_integer_bounds() {
        let schema = TableSchema::new("t", vec![ColumnDef::new("x", ColumnType::TinyInt, 0)]);
        assert!(schema.validate_row(&[Value::Integer(127)]).is_ok());
        assert!(schema.validate_row(&[Value::Integer(128)]).is_err());
    }
}
