//! Binary table codec
//!
//! Bit-exact serialization of one table (header + metadata + rows) to and
//! from a single file. See `SPEC_FULL.md` §4.1 for the byte layout this
//! module implements verbatim: little-endian, no alignment padding, a
//! per-row null bitmap ahead of each row's column values, and a JSON
//! extension section inside the metadata block for index/constraint
//! descriptors that aren't part of the original fixed layout.

use crate::error::{Error, Result};
use crate::types::{Column, DataType, IndexMetadata, Row, TableMetadata, Value};

/// Magic number gating every table file: `b"BGDM"` read little-endian.
pub const MAGIC: u32 = 0x4D44_4247;

/// Current on-disk format version. A reader encountering a higher version
/// must fail `CorruptFile` rather than guess at an unknown layout.
pub const VERSION: u16 = 1;

/// A fully materialized table: header implicit, metadata, and every row.
///
/// In-memory lifetime is bounded by a single storage operation — there is no
/// long-lived table cache (`SPEC_FULL.md` §3).
#[derive(Debug, Clone)]
pub struct Table {
    pub metadata: TableMetadata,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(metadata: TableMetadata) -> Self {
        Self {
            metadata,
            rows: Vec::new(),
        }
    }
}

/// Byte length of the fixed file header (magic + version + metadata_length).
const HEADER_LEN: usize = 4 + 2 + 4;

fn null_bitmap_len(column_count: usize) -> usize {
    (column_count + 7) / 8
}

/// Extension section payload: everything in `TableMetadata` that sits
/// outside the original fixed layout (`SPEC_FULL.md` §3).
#[derive(serde::Serialize, serde::Deserialize)]
struct MetadataExtension {
    indexes: Vec<IndexMetadata>,
    constraints: Vec<String>,
}

/// Serialize a whole table to its on-disk byte representation.
///
/// Computes `metadata_length` from a first serialization pass, sets
/// `data_offset = HEADER_LEN + metadata_length`, then reserializes the
/// metadata with that offset before appending rows — matching the
/// two-pass contract in `SPEC_FULL.md` §4.1.
pub fn serialize_table(table: &Table) -> Result<Vec<u8>> {
    table.metadata.validate()?;

    let mut metadata = table.metadata.clone();
    metadata.row_count = table.rows.len() as u64;

    // First pass: figure out how long the metadata block will be.
    let provisional = serialize_metadata(&metadata)?;
    metadata.data_offset = (HEADER_LEN + provisional.len()) as u32;
    let metadata_bytes = serialize_metadata(&metadata)?;

    let mut out = Vec::with_capacity(HEADER_LEN + metadata_bytes.len() + table.rows.len() * 16);
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(metadata_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&metadata_bytes);

    for row in &table.rows {
        serialize_row(&mut out, row, &metadata.columns)?;
    }

    Ok(out)
}

fn serialize_metadata(metadata: &TableMetadata) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    let name_bytes = metadata.name.as_bytes();
    out.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(name_bytes);

    out.extend_from_slice(&(metadata.columns.len() as i64).to_le_bytes());
    for column in &metadata.columns {
        let col_name = column.name.as_bytes();
        out.extend_from_slice(&(col_name.len() as u16).to_le_bytes());
        out.extend_from_slice(col_name);
        out.push(column.data_type.tag() as u8);
        out.extend_from_slice(&column.length.to_le_bytes());
        out.push(if column.nullable { 1 } else { 0 });
    }

    out.extend_from_slice(&(metadata.row_count as i64).to_le_bytes());
    out.extend_from_slice(&metadata.data_offset.to_le_bytes());

    let ext = MetadataExtension {
        indexes: metadata.indexes.clone(),
        constraints: metadata.constraints.clone(),
    };
    let ext_bytes = serde_json::to_vec(&ext).map_err(|e| {
        Error::InvalidData(format!("failed to encode metadata extension: {}", e))
    })?;
    out.extend_from_slice(&(ext_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&ext_bytes);

    Ok(out)
}

fn serialize_row(out: &mut Vec<u8>, row: &Row, columns: &[Column]) -> Result<()> {
    if row.values.len() != columns.len() {
        return Err(Error::column_count_mismatch(columns.len(), row.values.len()));
    }

    let mut bitmap = vec![0u8; null_bitmap_len(columns.len())];
    for (i, value) in row.values.iter().enumerate() {
        if value.is_null() {
            if !columns[i].nullable {
                return Err(Error::InvalidData(format!(
                    "column '{}' is not nullable",
                    columns[i].name
                )));
            }
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    out.extend_from_slice(&bitmap);

    for (value, column) in row.values.iter().zip(columns.iter()) {
        if value.is_null() {
            continue;
        }
        if !column.data_type.accepts(value) {
            return Err(Error::InvalidData(format!(
                "column '{}' expects {} but got a value of a different type",
                column.name, column.data_type
            )));
        }
        match value {
            Value::Integer(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::String(s) => {
                let bytes = s.as_bytes();
                if bytes.len() > column.length as usize {
                    return Err(Error::InvalidData(format!(
                        "string value for column '{}' exceeds declared length {}",
                        column.name, column.length
                    )));
                }
                out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                out.extend_from_slice(bytes);
            }
            Value::Boolean(v) => out.push(if *v { 1 } else { 0 }),
            Value::Timestamp(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Datetime(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Null => unreachable!("null values are skipped above"),
        }
    }

    Ok(())
}

/// A cursor over an in-memory byte slice, failing `CorruptFile` on any
/// attempt to read past the end.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::CorruptFile(
                "unexpected end of file while reading table data".into(),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::CorruptFile("invalid UTF-8 in table file".into()))
    }
}

/// Deserialize a whole table from its on-disk byte representation.
///
/// Fails `CorruptFile` on a magic mismatch, unsupported version, or any
/// truncated read; reads exactly `row_count` rows.
pub fn deserialize_table(bytes: &[u8]) -> Result<Table> {
    let mut r = Reader::new(bytes);

    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(Error::CorruptFile(format!(
            "bad magic: expected {:#010x}, got {:#010x}",
            MAGIC, magic
        )));
    }
    let version = r.u16()?;
    if version > VERSION {
        return Err(Error::CorruptFile(format!(
            "unsupported table file version {}",
            version
        )));
    }
    let metadata_length = r.u32()? as usize;

    let metadata_bytes = r.take(metadata_length)?;
    let metadata = deserialize_metadata(metadata_bytes)?;

    let mut rows = Vec::with_capacity(metadata.row_count as usize);
    for _ in 0..metadata.row_count {
        rows.push(deserialize_row(&mut r, &metadata.columns)?);
    }

    Ok(Table { metadata, rows })
}

fn deserialize_metadata(bytes: &[u8]) -> Result<TableMetadata> {
    let mut r = Reader::new(bytes);

    let name_len = r.u16()? as usize;
    let name = r.string(name_len)?;

    let column_count = r.i64()?;
    if column_count < 0 {
        return Err(Error::CorruptFile("negative column count".into()));
    }
    let mut columns = Vec::with_capacity(column_count as usize);
    for _ in 0..column_count {
        let col_name_len = r.u16()? as usize;
        let col_name = r.string(col_name_len)?;
        let tag = r.i8()?;
        let data_type = DataType::from_tag(tag)
            .ok_or_else(|| Error::CorruptFile(format!("unknown column type tag {}", tag)))?;
        let length = r.u16()?;
        let is_nullable = r.u8()? != 0;
        columns.push(Column {
            name: col_name,
            data_type,
            length,
            nullable: is_nullable,
            is_primary_key: false,
            default_value: None,
        });
    }

    let row_count = r.i64()?;
    if row_count < 0 {
        return Err(Error::CorruptFile("negative row count".into()));
    }
    let data_offset = r.u32()?;

    let ext_len = r.u32()? as usize;
    let ext_bytes = r.take(ext_len)?;
    let ext: MetadataExtension = if ext_len == 0 {
        MetadataExtension {
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    } else {
        serde_json::from_slice(ext_bytes)
            .map_err(|e| Error::CorruptFile(format!("invalid metadata extension: {}", e)))?
    };

    Ok(TableMetadata {
        name,
        columns,
        row_count: row_count as u64,
        data_offset,
        indexes: ext.indexes,
        constraints: ext.constraints,
    })
}

fn deserialize_row(r: &mut Reader<'_>, columns: &[Column]) -> Result<Row> {
    let bitmap = r.take(null_bitmap_len(columns.len()))?.to_vec();

    let mut values = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let is_null = bitmap[i / 8] & (1 << (i % 8)) != 0;
        if is_null {
            values.push(Value::Null);
            continue;
        }
        let value = match column.data_type {
            DataType::Integer64 => Value::Integer(r.i64()?),
            DataType::Float64 => Value::Float(r.f64()?),
            DataType::String => {
                let len = r.u16()? as usize;
                Value::String(r.string(len)?)
            }
            DataType::Boolean => Value::Boolean(r.u8()? != 0),
            DataType::Timestamp => Value::Timestamp(r.i64()?),
            DataType::Datetime => Value::Datetime(r.i64()?),
        };
        values.push(value);
    }

    Ok(Row::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Column;

    fn sample_table() -> Table {
        let columns = vec![
            Column::new("id", DataType::Integer64).not_null(),
            Column::new("name", DataType::String).with_length(10),
        ];
        let mut table = Table::new(TableMetadata::new("t", columns));
        table.rows.push(Row::new(vec![
            Value::Integer(1),
            Value::String("a".into()),
        ]));
        table.rows.push(Row::new(vec![Value::Integer(2), Value::Null]));
        table
    }

    #[test]
    fn round_trip_preserves_rows_and_nulls() {
        let table = sample_table();
        let bytes = serialize_table(&table).unwrap();
        let decoded = deserialize_table(&bytes).unwrap();

        assert_eq!(decoded.metadata.name, "t");
        assert_eq!(decoded.rows.len(), 2);
        assert_eq!(decoded.rows[0].values[0], Value::Integer(1));
        assert_eq!(decoded.rows[0].values[1], Value::String("a".into()));
        assert!(decoded.rows[1].values[1].is_null());
    }

    #[test]
    fn data_offset_matches_header_plus_metadata_length() {
        let table = sample_table();
        let bytes = serialize_table(&table).unwrap();
        let decoded = deserialize_table(&bytes).unwrap();
        let metadata_length = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(
            decoded.metadata.data_offset as usize,
            HEADER_LEN + metadata_length as usize
        );
    }

    #[test]
    fn magic_mismatch_is_corrupt_file() {
        let bytes = [0u8, 0, 0, 0];
        let err = deserialize_table(&bytes).unwrap_err();
        assert!(matches!(err, Error::CorruptFile(_)));
    }

    #[test]
    fn higher_version_is_corrupt_file() {
        let mut table = sample_table();
        table.rows.clear();
        let mut bytes = serialize_table(&table).unwrap();
        bytes[4] = 2;
        bytes[5] = 0;
        let err = deserialize_table(&bytes).unwrap_err();
        assert!(matches!(err, Error::CorruptFile(_)));
    }

    #[test]
    fn string_exceeding_declared_length_is_invalid_data() {
        let columns = vec![Column::new("s", DataType::String).with_length(2)];
        let mut table = Table::new(TableMetadata::new("t", columns));
        table.rows.push(Row::new(vec![Value::String("abc".into())]));
        let err = serialize_table(&table).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn wrong_runtime_type_for_column_is_invalid_data() {
        let columns = vec![Column::new("n", DataType::Integer64)];
        let mut table = Table::new(TableMetadata::new("t", columns));
        table.rows.push(Row::new(vec![Value::String("nope".into())]));
        let err = serialize_table(&table).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn null_in_non_nullable_column_is_invalid_data() {
        let columns = vec![Column::new("n", DataType::Integer64).not_null()];
        let mut table = Table::new(TableMetadata::new("t", columns));
        table.rows.push(Row::new(vec![Value::Null]));
        let err = serialize_table(&table).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn index_and_constraint_extension_round_trips() {
        let columns = vec![Column::new("id", DataType::Integer64)];
        let mut metadata = TableMetadata::new("t", columns);
        metadata.indexes.push(IndexMetadata {
            name: "idx_id".into(),
            columns: vec!["id".into()],
            unique: true,
        });
        metadata.constraints.push("fk_parent".into());
        let table = Table::new(metadata);

        let bytes = serialize_table(&table).unwrap();
        let decoded = deserialize_table(&bytes).unwrap();
        assert_eq!(decoded.metadata.indexes.len(), 1);
        assert_eq!(decoded.metadata.indexes[0].name, "idx_id");
        assert_eq!(decoded.metadata.constraints, vec!["fk_parent".to_string()]);
    }
}
