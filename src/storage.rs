//! Table storage operations
//!
//! CRUD primitives over one table file (`SPEC_FULL.md` §4.2). Every mutation
//! is a read-all/modify/write-all cycle: there is no long-lived table cache
//! and no incremental append on disk, trading write amplification for
//! format simplicity. Operations take an already-resolved file `Path` rather
//! than a bare table name, so the same code serves both direct
//! (auto-commit) access and shadow-routed access inside a transaction — the
//! caller (`txn.rs`) is responsible for resolving `(table_name,
//! transaction_id)` to the right path before calling in here.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};
use crate::format::{self, Table};
use crate::operation::{AlterOp, Predicate};
use crate::types::{Column, IndexMetadata, Row, TableMetadata, Value};

/// The storage engine resolves table names to file paths and performs the
/// read-modify-write cycle against the configured data directory.
pub struct StorageEngine {
    data_dir: PathBuf,
}

impl StorageEngine {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Validate a table name to prevent path traversal, then resolve it to
    /// its on-disk path (`<data_dir>/<name>.bin`).
    pub fn table_path(&self, table_name: &str) -> Result<PathBuf> {
        validate_table_name(table_name)?;
        Ok(self.data_dir.join(format!("{}.bin", table_name)))
    }

    fn load(&self, path: &Path) -> Result<Table> {
        let mut file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::table_not_found(table_name_from_path(path))
            } else {
                Error::Io(e)
            }
        })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        format::deserialize_table(&bytes)
    }

    /// Write a whole table to disk via write-temp-then-rename, matching the
    /// teacher's `save_table` atomic-swap idiom.
    fn save(&self, path: &Path, table: &Table) -> Result<()> {
        let bytes = format::serialize_table(table)?;
        let temp_path = path.with_extension("bin.tmp");
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.flush()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn table_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    pub fn create_table(&self, path: &Path, metadata: TableMetadata) -> Result<()> {
        if path.exists() {
            return Err(Error::table_already_exists(&metadata.name));
        }
        let table = Table::new(metadata);
        self.save(path, &table)?;
        debug!("created table at {}", path.display());
        Ok(())
    }

    pub fn drop_table(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(Error::table_not_found(table_name_from_path(path)));
        }
        fs::remove_file(path)?;
        debug!("dropped table at {}", path.display());
        Ok(())
    }

    pub fn read_metadata(&self, path: &Path) -> Result<TableMetadata> {
        Ok(self.load(path)?.metadata)
    }

    /// Append `rows` to the table. Each row must type-match the schema;
    /// the whole write is rejected (no partial append) if any row fails.
    pub fn write_rows(&self, path: &Path, rows: Vec<Row>) -> Result<u64> {
        let mut table = self.load(path)?;
        let added = rows.len() as u64;
        table.rows.extend(rows);
        self.save(path, &table)?;
        Ok(added)
    }

    /// Full scan with an optional predicate and column projection.
    /// `fields` empty or `["*"]` projects every column in schema order;
    /// otherwise the named columns in the order requested. Unknown column
    /// names fail `InvalidData`.
    pub fn read_rows(
        &self,
        path: &Path,
        fields: &[String],
        predicate: Option<&Predicate>,
    ) -> Result<(Vec<String>, Vec<Row>)> {
        let table = self.load(path)?;
        let columns = &table.metadata.columns;

        let projected_indices: Vec<usize> = if fields.is_empty() || fields == ["*"] {
            (0..columns.len()).collect()
        } else {
            fields
                .iter()
                .map(|name| {
                    columns
                        .iter()
                        .position(|c| c.name.eq_ignore_ascii_case(name))
                        .ok_or_else(|| Error::unknown_column(name))
                })
                .collect::<Result<Vec<_>>>()?
        };
        let projected_names: Vec<String> = projected_indices
            .iter()
            .map(|&i| columns[i].name.clone())
            .collect();

        let mut out = Vec::new();
        for row in &table.rows {
            let accept = match predicate {
                Some(p) => p.eval(row, columns)?,
                None => true,
            };
            if accept {
                let projected = projected_indices
                    .iter()
                    .map(|&i| row.values[i].clone())
                    .collect();
                out.push(Row::new(projected));
            }
        }
        Ok((projected_names, out))
    }

    /// Full scan; keep rows that do not match `predicate`. Writes back only
    /// if at least one row was removed. Returns the count deleted.
    pub fn delete_rows(&self, path: &Path, predicate: Option<&Predicate>) -> Result<u64> {
        let mut table = self.load(path)?;
        let columns = table.metadata.columns.clone();

        let mut kept = Vec::with_capacity(table.rows.len());
        let mut deleted = 0u64;
        for row in table.rows.drain(..) {
            let matches = match predicate {
                Some(p) => p.eval(&row, &columns)?,
                None => true,
            };
            if matches {
                deleted += 1;
            } else {
                kept.push(row);
            }
        }
        table.rows = kept;

        if deleted > 0 {
            self.save(path, &table)?;
        }
        Ok(deleted)
    }

    /// Full scan; for each matching row, replace the named columns.
    /// Returns the count updated.
    pub fn update_rows(
        &self,
        path: &Path,
        assignments: &[(String, Value)],
        predicate: Option<&Predicate>,
    ) -> Result<u64> {
        let mut table = self.load(path)?;
        let columns = table.metadata.columns.clone();

        let resolved: Vec<(usize, Value)> = assignments
            .iter()
            .map(|(name, value)| {
                columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
                    .map(|idx| (idx, value.clone()))
                    .ok_or_else(|| Error::unknown_column(name))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut updated = 0u64;
        for row in table.rows.iter_mut() {
            let matches = match predicate {
                Some(p) => p.eval(row, &columns)?,
                None => true,
            };
            if matches {
                for (idx, value) in &resolved {
                    row.values[*idx] = value.clone();
                }
                updated += 1;
            }
        }

        if updated > 0 {
            self.save(path, &table)?;
        }
        Ok(updated)
    }

    /// `AddColumns` appends new columns with nullable/default semantics;
    /// existing rows gain the default value, or NULL if none was declared.
    /// `DropConstraint` removes a named foreign-key constraint. No column
    /// removal or retyping is supported.
    pub fn alter_table(&self, path: &Path, op: AlterOp) -> Result<TableMetadata> {
        let mut table = self.load(path)?;

        match op {
            AlterOp::AddColumns(new_columns) => {
                for column in &new_columns {
                    if table.metadata.find_column(&column.name).is_some() {
                        return Err(Error::duplicate_column(&column.name));
                    }
                    if column.data_type == crate::types::DataType::String && column.length == 0 {
                        return Err(Error::InvalidData(format!(
                            "string column '{}' must declare a positive length",
                            column.name
                        )));
                    }
                }
                let fill: Vec<Value> = new_columns
                    .iter()
                    .map(|c| c.default_value.clone().unwrap_or(Value::Null))
                    .collect();
                for row in table.rows.iter_mut() {
                    row.values.extend(fill.iter().cloned());
                }
                table.metadata.columns.extend(new_columns);
            }
            AlterOp::DropConstraint(name) => {
                let before = table.metadata.constraints.len();
                table.metadata.constraints.retain(|c| c != &name);
                if table.metadata.constraints.len() == before {
                    return Err(Error::InvalidData(format!(
                        "constraint '{}' not found",
                        name
                    )));
                }
            }
        }

        self.save(path, &table)?;
        Ok(table.metadata)
    }

    pub fn create_index(&self, path: &Path, index: IndexMetadata) -> Result<TableMetadata> {
        let mut table = self.load(path)?;
        if table.metadata.indexes.iter().any(|i| i.name == index.name) {
            return Err(Error::InvalidData(format!(
                "index '{}' already exists",
                index.name
            )));
        }
        for column_name in &index.columns {
            if table.metadata.find_column(column_name).is_none() {
                return Err(Error::unknown_column(column_name));
            }
        }
        table.metadata.indexes.push(index);
        self.save(path, &table)?;
        Ok(table.metadata)
    }

    pub fn drop_index(&self, path: &Path, index_name: &str) -> Result<TableMetadata> {
        let mut table = self.load(path)?;
        let before = table.metadata.indexes.len();
        table.metadata.indexes.retain(|i| i.name != index_name);
        if table.metadata.indexes.len() == before {
            return Err(Error::InvalidData(format!(
                "index '{}' not found",
                index_name
            )));
        }
        self.save(path, &table)?;
        Ok(table.metadata)
    }

    pub fn list_indexes(&self, path: &Path) -> Result<Vec<IndexMetadata>> {
        Ok(self.load(path)?.metadata.indexes)
    }
}

/// Prevent path traversal: table names may not escape the data directory.
fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidData("table name cannot be empty".into()));
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(Error::InvalidData(format!(
            "invalid table name '{}': contains forbidden characters",
            name
        )));
    }
    if name.len() > 255 {
        return Err(Error::InvalidData("table name too long".into()));
    }
    Ok(())
}

fn table_name_from_path(path: &Path) -> &str {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("?")
}
