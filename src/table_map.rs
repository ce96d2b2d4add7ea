//! In-memory TableMap bookkeeping and row decoding.
//!
//! A TableMap event binds a `table_id` (valid only for the transaction
//! that follows it) to a `(schema, table, column-type list)`. Rows
//! events reference rows purely by `table_id`, so the Binlog Client
//! keeps a `table_id -> TableMapEntry` map here, flushed on Rotate.

use crate::decode::{self, ColumnType};
use crate::error::{CdcError, Result};
use crate::events::{CellValue, Column, RowData, TableMeta};
use std::collections::HashMap;
use std::io::Cursor;

/// One column's type code plus its metadata bytes (precision/scale for
/// DECIMAL, fractional-seconds digit count for temporal v2 types,
/// display width for integers, etc.) as carried in the TableMap event.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub col_type: ColumnType,
    pub meta: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct TableMapEntry {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub null_bitmap: Vec<u8>,
}

impl TableMapEntry {
    pub fn to_table_meta(&self, column_names: Option<&[String]>) -> TableMeta {
        let columns = match column_names {
            Some(names) if names.len() == self.columns.len() => names.to_vec(),
            _ => (0..self.columns.len()).map(|i| format!("col_{i}")).collect(),
        };
        let types = self.columns.iter().map(|c| c.col_type.tag().to_string()).collect();
        TableMeta {
            schema: self.schema.clone(),
            table: self.table.clone(),
            columns,
            types,
        }
    }
}

/// Tracks live TableMap entries for the current transaction window.
#[derive(Debug, Default)]
pub struct TableMapRegistry {
    tables: HashMap<u64, TableMapEntry>,
}

impl TableMapRegistry {
    pub fn new() -> Self {
        TableMapRegistry::default()
    }

    pub fn insert(&mut self, table_id: u64, entry: TableMapEntry) {
        self.tables.insert(table_id, entry);
    }

    pub fn get(&self, table_id: u64) -> Option<&TableMapEntry> {
        self.tables.get(&table_id)
    }

    /// Rows events reference a table_id only within the transaction
    /// that follows their TableMap; Rotate starts a fresh binlog file
    /// and invalidates all table_ids from the prior file.
    pub fn flush(&mut self) {
        self.tables.clear();
    }
}

/// Parses a TableMap event body (post table-id/flags) into column type
/// codes, per-column metadata, and the nullability bitmap.
pub fn parse_column_defs(column_types: &[u8], meta_block: &[u8]) -> Result<Vec<ColumnDef>> {
    let mut cursor = Cursor::new(meta_block);
    let mut defs = Vec::with_capacity(column_types.len());

    for &raw_type in column_types {
        let col_type = ColumnType::from_u8(raw_type);
        let meta = read_column_meta(&mut cursor, col_type)?;
        defs.push(ColumnDef { col_type, meta });
    }

    Ok(defs)
}

fn read_column_meta(cursor: &mut Cursor<&[u8]>, col_type: ColumnType) -> Result<Vec<u8>> {
    use std::io::Read;

    let n = match col_type {
        ColumnType::Float | ColumnType::Double => 1,
        ColumnType::NewDecimal => 2,
        ColumnType::Varchar | ColumnType::Bit => 2,
        ColumnType::Timestamp2 | ColumnType::DateTime2 | ColumnType::Time2 => 1,
        ColumnType::String | ColumnType::VarString => 2,
        ColumnType::Enum | ColumnType::Set => 2,
        ColumnType::Blob
        | ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Json
        | ColumnType::Geometry => 1,
        _ => 0,
    };

    let mut buf = vec![0u8; n];
    if n > 0 {
        Read::read_exact(cursor, &mut buf).map_err(|e| CdcError::Decode(format!("column meta: {e}")))?;
    }
    Ok(buf)
}

/// Decodes one row's present columns into `RowData`. `presence` marks
/// which columns are included in this row image at all (UPDATE carries
/// separate before/after presence bitmaps); within a present column, a
/// bit in `null_bitmap` (read inline, one per present column, MSB-first
/// packing like the outer bitmaps) marks it NULL.
pub fn decode_row(
    columns: &[ColumnDef],
    column_names: &[String],
    presence: &[u8],
    data: &[u8],
) -> Result<(RowData, usize)> {
    let present_count = (0..columns.len()).filter(|&i| decode::bitmap_is_set(presence, i)).count();
    let null_bitmap_len = decode::bitmap_len(present_count);
    if data.len() < null_bitmap_len {
        return Err(CdcError::Decode("row data shorter than null bitmap".into()));
    }
    let null_bitmap = &data[..null_bitmap_len];
    let mut offset = null_bitmap_len;
    let mut present_idx = 0usize;

    let mut row = Vec::with_capacity(columns.len());
    for (i, def) in columns.iter().enumerate() {
        let name = column_names.get(i).cloned().unwrap_or_else(|| format!("col_{i}"));
        if !decode::bitmap_is_set(presence, i) {
            row.push(Column {
                name,
                type_tag: def.col_type.tag().to_string(),
                value: CellValue::Null,
                is_null: true,
                updated: false,
            });
            continue;
        }

        let is_null = decode::bitmap_is_set(null_bitmap, present_idx);
        present_idx += 1;

        if is_null {
            row.push(Column {
                name,
                type_tag: def.col_type.tag().to_string(),
                value: CellValue::Null,
                is_null: true,
                updated: false,
            });
            continue;
        }

        let (value, consumed) = decode_value(def, &data[offset..])?;
        offset += consumed;
        row.push(Column {
            name,
            type_tag: def.col_type.tag().to_string(),
            value,
            is_null: false,
            updated: false,
        });
    }

    Ok((row, offset))
}

fn decode_value(def: &ColumnDef, data: &[u8]) -> Result<(CellValue, usize)> {
    use byteorder::{ByteOrder, LittleEndian};

    match def.col_type {
        ColumnType::Tiny => Ok((CellValue::Int(data[0] as i8 as i64), 1)),
        ColumnType::Short => Ok((CellValue::Int(LittleEndian::read_i16(data) as i64), 2)),
        ColumnType::Int24 => {
            let b = [data[0], data[1], data[2], if data[2] & 0x80 != 0 { 0xFF } else { 0 }];
            Ok((CellValue::Int(i32::from_le_bytes(b) as i64), 3))
        }
        ColumnType::Long => Ok((CellValue::Int(LittleEndian::read_i32(data) as i64), 4)),
        ColumnType::LongLong => Ok((CellValue::Int(LittleEndian::read_i64(data)), 8)),
        ColumnType::Year => Ok((CellValue::Int(1900 + data[0] as i64), 1)),
        ColumnType::Float => Ok((CellValue::Float(LittleEndian::read_f32(data) as f64), 4)),
        ColumnType::Double => Ok((CellValue::Float(LittleEndian::read_f64(data)), 8)),
        ColumnType::NewDecimal | ColumnType::Decimal => {
            let precision = def.meta.first().copied().unwrap_or(10) as usize;
            let scale = def.meta.get(1).copied().unwrap_or(0) as usize;
            let (s, consumed) = decode::decode_decimal(data, precision, scale)?;
            Ok((CellValue::Decimal(s), consumed))
        }
        ColumnType::Timestamp2 => {
            let meta = def.meta.first().copied().unwrap_or(0);
            let (secs, micros, consumed) = decode::decode_timestamp2(data, meta)?;
            let s = format_epoch_seconds(secs, micros, meta);
            Ok((CellValue::DateTime(s), consumed))
        }
        ColumnType::DateTime2 => {
            let meta = def.meta.first().copied().unwrap_or(0);
            let (y, mo, d, h, mi, s, micros, consumed) = decode::decode_datetime2(data, meta)?;
            let value = if y == 0 && mo == 0 && d == 0 {
                "0000-00-00 00:00:00".to_string()
            } else {
                format_datetime(y, mo, d, h, mi, s, micros, meta)
            };
            Ok((CellValue::DateTime(value), consumed))
        }
        ColumnType::Time2 => {
            let meta = def.meta.first().copied().unwrap_or(0);
            let (negative, h, mi, s, micros, consumed) = decode::decode_time2(data, meta)?;
            Ok((CellValue::Time(format_time(negative, h, mi, s, micros, meta)), consumed))
        }
        ColumnType::Date => {
            let raw = (data[0] as u32) | (data[1] as u32) << 8 | (data[2] as u32) << 16;
            let day = raw & 0x1F;
            let month = (raw >> 5) & 0xF;
            let year = raw >> 9;
            Ok((CellValue::Date(format!("{year:04}-{month:02}-{day:02}")), 3))
        }
        ColumnType::Varchar | ColumnType::VarString => decode_length_prefixed_string(data, &def.meta),
        ColumnType::String => decode_length_prefixed_string(data, &def.meta),
        ColumnType::Blob | ColumnType::TinyBlob | ColumnType::MediumBlob | ColumnType::LongBlob | ColumnType::Json => {
            let len_bytes = def.meta.first().copied().unwrap_or(1) as usize;
            let len = read_le_len(data, len_bytes);
            let start = len_bytes;
            let end = start + len;
            if data.len() < end {
                return Err(CdcError::Decode("blob length exceeds buffer".into()));
            }
            Ok((CellValue::Bytes(data[start..end].to_vec()), end))
        }
        ColumnType::Bit => {
            let bytes = def.meta.get(1).copied().unwrap_or(1) as usize;
            let n = bytes.max(1);
            Ok((CellValue::Bytes(data[..n].to_vec()), n))
        }
        ColumnType::Enum | ColumnType::Set => {
            let size = def.meta.get(1).copied().unwrap_or(1) as usize;
            let val = read_le_len(data, size.max(1));
            Ok((CellValue::UInt(val as u64), size.max(1)))
        }
        ColumnType::Null => Ok((CellValue::Null, 0)),
        ColumnType::Unknown(_) | ColumnType::Timestamp | ColumnType::DateTime | ColumnType::Time | ColumnType::NewDate | ColumnType::Geometry => {
            Ok((CellValue::Bytes(data.to_vec()), data.len()))
        }
    }
}

fn read_le_len(data: &[u8], len_bytes: usize) -> usize {
    let mut v: usize = 0;
    for (i, &byte) in data.iter().enumerate().take(len_bytes) {
        v |= (byte as usize) << (8 * i);
    }
    v
}

fn decode_length_prefixed_string(data: &[u8], meta: &[u8]) -> Result<(CellValue, usize)> {
    let max_len = u16::from_le_bytes([meta.first().copied().unwrap_or(0), meta.get(1).copied().unwrap_or(0)]);
    let len_bytes = if max_len > 255 { 2 } else { 1 };
    let len = read_le_len(data, len_bytes);
    let start = len_bytes;
    let end = start + len;
    if data.len() < end {
        return Err(CdcError::Decode("string length exceeds buffer".into()));
    }
    Ok((CellValue::String(String::from_utf8_lossy(&data[start..end]).to_string()), end))
}

fn format_epoch_seconds(secs: i64, micros: u32, meta: u8) -> String {
    let dt = chrono::DateTime::<chrono::Utc>::from_timestamp(secs, micros * 1000)
        .unwrap_or_else(|| chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap());
    if meta == 0 {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        let frac = format!("{:06}", micros);
        format!("{}.{}", dt.format("%Y-%m-%d %H:%M:%S"), &frac[..meta as usize])
    }
}

#[allow(clippy::too_many_arguments)]
fn format_datetime(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, micros: u32, meta: u8) -> String {
    let base = format!("{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}");
    if meta == 0 {
        base
    } else {
        let frac = format!("{:06}", micros);
        format!("{base}.{}", &frac[..meta as usize])
    }
}

fn format_time(negative: bool, h: u32, mi: u32, s: u32, micros: u32, meta: u8) -> String {
    let sign = if negative { "-" } else { "" };
    let base = format!("{sign}{h:02}:{mi:02}:{s:02}");
    if meta == 0 {
        base
    } else {
        let frac = format!("{:06}", micros);
        format!("{base}.{}", &frac[..meta as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_flush_drops_all_entries() {
        let mut reg = TableMapRegistry::new();
        reg.insert(
            1,
            TableMapEntry {
                schema: "test".into(),
                table: "users".into(),
                columns: vec![],
                null_bitmap: vec![],
            },
        );
        assert!(reg.get(1).is_some());
        reg.flush();
        assert!(reg.get(1).is_none());
    }

    #[test]
    fn decode_row_respects_presence_and_null_bitmaps() {
        let columns = vec![
            ColumnDef {
                col_type: ColumnType::Long,
                meta: vec![],
            },
            ColumnDef {
                col_type: ColumnType::Varchar,
                meta: vec![100, 0],
            },
        ];
        let names = vec!["id".to_string(), "name".to_string()];
        // both present, neither null
        let presence = [0b0000_0011u8];
        let mut data = vec![0b0000_0000u8]; // null bitmap: none null
        data.extend_from_slice(&42i32.to_le_bytes());
        data.push(5); // varchar length (1-byte since max_len <= 255)
        data.extend_from_slice(b"alice");

        let (row, consumed) = decode_row(&columns, &names, &presence, &data).unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row[0].value, CellValue::Int(42));
        assert_eq!(row[1].value, CellValue::String("alice".to_string()));
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn decode_row_marks_absent_column_null() {
        let columns = vec![
            ColumnDef {
                col_type: ColumnType::Long,
                meta: vec![],
            },
            ColumnDef {
                col_type: ColumnType::Long,
                meta: vec![],
            },
        ];
        let names = vec!["a".to_string(), "b".to_string()];
        let presence = [0b0000_0001u8]; // only column 0 present
        let mut data = vec![0b0000_0000u8];
        data.extend_from_slice(&7i32.to_le_bytes());

        let (row, _) = decode_row(&columns, &names, &presence, &data).unwrap();
        assert_eq!(row[0].value, CellValue::Int(7));
        assert!(row[1].is_null);
    }
}
