//! Logical data model: decoded column values, rows, table metadata, and
//! the per-row-change `Event` delivered to handlers.

use crate::position::Position;
use serde::{Deserialize, Serialize};

/// One decoded MySQL column value.
///
/// `Decimal` and `DateTime`/`Date`/`Time` are kept as strings rather than
/// native numeric/temporal types: MySQL's DECIMAL precision and its
/// zero-dates (`0000-00-00`) do not round-trip cleanly through any single
/// Rust type, so the wire-accurate string form is what downstream
/// consumers (webhook JSON, event log) actually want.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    DateTime(String),
    Date(String),
    Time(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

/// Serializes as a flat scalar (the wire/webhook contract), not as an
/// internally-tagged `{"kind":..,"value":..}` object: `Decimal`/`String`/
/// the temporal variants all serialize as plain JSON strings.
impl Serialize for CellValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            CellValue::Null => serializer.serialize_none(),
            CellValue::Int(v) => serializer.serialize_i64(*v),
            CellValue::UInt(v) => serializer.serialize_u64(*v),
            CellValue::Float(v) => serializer.serialize_f64(*v),
            CellValue::Decimal(s)
            | CellValue::String(s)
            | CellValue::DateTime(s)
            | CellValue::Date(s)
            | CellValue::Time(s) => serializer.serialize_str(s),
            CellValue::Bytes(b) => b.serialize(serializer),
        }
    }
}

/// One column's value within a `RowData`, paired with the static metadata
/// (name, MySQL type tag) it was decoded against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// MySQL type tag, e.g. "int", "varchar", "decimal" — from `TableMeta`.
    #[serde(rename = "type")]
    pub type_tag: String,
    pub value: CellValue,
    pub is_null: bool,
    /// Only meaningful inside the `after` row of an UPDATE event: true
    /// when this column's value differs from the paired `before` row.
    pub updated: bool,
}

/// An ordered list of columns, parallel to `TableMeta::columns`.
pub type RowData = Vec<Column>;

/// Schema for one `(schema, table)`, built from the binlog's TableMap
/// events. `columns` and `types` are parallel and equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
    pub types: Vec<String>,
}

impl TableMeta {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Insert => "INSERT",
            EventType::Update => "UPDATE",
            EventType::Delete => "DELETE",
        }
    }
}

/// One logical row-change event, ready for delivery to handlers.
///
/// Invariants (enforced at construction in `rows_decoder`):
/// INSERT carries only `after`; DELETE carries only `before`; UPDATE
/// carries both with equal column length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique id derived from `(log_file, log_pos, row_index)`.
    pub id: String,
    pub schema: String,
    pub table: String,
    pub event_type: EventType,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub position: Position,
    #[serde(rename = "before_data", skip_serializing_if = "Option::is_none")]
    pub before: Option<RowData>,
    #[serde(rename = "after_data", skip_serializing_if = "Option::is_none")]
    pub after: Option<RowData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

impl Event {
    pub fn make_id(log_file: &str, log_pos: u32, row_index: usize) -> String {
        format!("{log_file}:{log_pos}:{row_index}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_is_stable_for_same_inputs() {
        let a = Event::make_id("mysql-bin.000001", 4096, 0);
        let b = Event::make_id("mysql-bin.000001", 4096, 0);
        assert_eq!(a, b);
        assert_ne!(a, Event::make_id("mysql-bin.000001", 4096, 1));
    }

    #[test]
    fn table_meta_column_count_matches_columns_len() {
        let meta = TableMeta {
            schema: "test".into(),
            table: "users".into(),
            columns: vec!["id".into(), "name".into()],
            types: vec!["int".into(), "varchar".into()],
        };
        assert_eq!(meta.column_count(), 2);
    }
}
