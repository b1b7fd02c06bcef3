//! Value, Column, and Row types for the relational + vector data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unified value type for every column.
///
/// `Null` never compares equal to `Null` (SQL semantics). `Embedding` values
/// are never compared for equality — only used as ANN search operands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Embedding(Vec<f32>),
}

impl Value {
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 2,
            Value::Bool(_) => 3,
            Value::Text(_) => 4,
            Value::Embedding(_) => 5,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_embedding(&self) -> Option<&[f32]> {
        match self {
            Value::Embedding(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// `Null` never equals `Null`; `Embedding` never equals anything (not even itself).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => false,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Embedding(_), Value::Embedding(_)) => false,
            _ => false,
        }
    }
}

/// Declared column type. `Embedding` may pin a dimension at DDL time, or leave
/// it unbound until the first insert fixes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    Text,
    Embedding { dim: Option<u32> },
}

impl ColumnType {
    pub fn type_tag(&self) -> u8 {
        match self {
            ColumnType::Int => 1,
            ColumnType::Float => 2,
            ColumnType::Bool => 3,
            ColumnType::Text => 4,
            ColumnType::Embedding { .. } => 5,
        }
    }
}

/// A named, typed column within a table. Column names are unique within a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub col_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
        }
    }
}

/// A row is a mapping from column name to value. Insertion order is irrelevant;
/// a `BTreeMap` keeps iteration deterministic, which matters for byte-exact
/// on-disk serialization.
pub type Row = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_never_equals_null() {
        assert_ne!(Value::Null, Value::Null);
    }

    #[test]
    fn embedding_never_equal() {
        let a = Value::Embedding(vec![1.0, 2.0]);
        let b = Value::Embedding(vec![1.0, 2.0]);
        assert_ne!(a, b);
    }

    #[test]
    fn scalars_compare_by_value() {
        assert_eq!(Value::Int(5), Value::Int(5));
        assert_ne!(Value::Int(5), Value::Int(6));
        assert_eq!(Value::Text("a".into()), Value::Text("a".into()));
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::Int(3).as_int(), Some(3));
        assert_eq!(Value::Text("x".into()).as_text(), Some("x"));
        assert_eq!(Value::Float(1.0).as_int(), None);
    }
}
