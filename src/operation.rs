//! Operation model
//!
//! `Operation` is the tagged value the (external) SQL front end lowers
//! statements into, and that the transaction manager drives through the
//! storage layer (`SPEC_FULL.md` §3, §4.6). `Predicate` is the compiled
//! form of a WHERE clause: an expression tree evaluated against a row and
//! its column schema, rather than a boxed closure, so it stays `Clone` and
//! crosses shadow-copy boundaries without capturing non-`Send` state.

use crate::error::{Error, Result};
use crate::types::{Column, IndexMetadata, Row, TableMetadata, Value};

/// A comparison operator in a compiled predicate leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A compiled WHERE-clause predicate: `(row, columns) -> bool`.
#[derive(Debug, Clone)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull(String),
    IsNotNull(String),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Evaluate this predicate against `row` using `columns` for name
    /// resolution. Fails `InvalidData` on an unknown column reference.
    pub fn eval(&self, row: &Row, columns: &[Column]) -> Result<bool> {
        match self {
            Predicate::Compare { column, op, value } => {
                let idx = columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(column))
                    .ok_or_else(|| Error::unknown_column(column))?;
                let lhs = &row.values[idx];
                if lhs.is_null() || value.is_null() {
                    return Ok(false);
                }
                let cmp = match lhs.partial_cmp(value) {
                    Some(ordering) => ordering,
                    None => return Ok(false),
                };
                Ok(match op {
                    CompareOp::Eq => cmp.is_eq(),
                    CompareOp::Ne => !cmp.is_eq(),
                    CompareOp::Lt => cmp.is_lt(),
                    CompareOp::Le => cmp.is_le(),
                    CompareOp::Gt => cmp.is_gt(),
                    CompareOp::Ge => cmp.is_ge(),
                })
            }
            Predicate::IsNull(column) => {
                let idx = columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(column))
                    .ok_or_else(|| Error::unknown_column(column))?;
                Ok(row.values[idx].is_null())
            }
            Predicate::IsNotNull(column) => {
                let idx = columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(column))
                    .ok_or_else(|| Error::unknown_column(column))?;
                Ok(!row.values[idx].is_null())
            }
            Predicate::And(lhs, rhs) => Ok(lhs.eval(row, columns)? && rhs.eval(row, columns)?),
            Predicate::Or(lhs, rhs) => Ok(lhs.eval(row, columns)? || rhs.eval(row, columns)?),
            Predicate::Not(inner) => Ok(!inner.eval(row, columns)?),
        }
    }
}

/// Schema alteration requests (`SPEC_FULL.md` §4.2). No column removal or
/// retyping is supported.
#[derive(Debug, Clone)]
pub enum AlterOp {
    AddColumns(Vec<Column>),
    DropConstraint(String),
}

/// A tagged action produced by the SQL front end and consumed by the
/// executor. Dispatch is by variant tag, never by subtype polymorphism.
#[derive(Debug, Clone)]
pub enum Operation {
    Read {
        table: String,
        fields: Vec<String>,
        predicate: Option<Predicate>,
    },
    Insert {
        table: String,
        rows: Vec<Row>,
    },
    Delete {
        table: String,
        predicate: Option<Predicate>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        predicate: Option<Predicate>,
    },
    Alter {
        table: String,
        op: AlterOp,
    },
    CreateTable {
        metadata: TableMetadata,
    },
    DropTable {
        table: String,
    },
    CreateIndex {
        table: String,
        index: IndexMetadata,
    },
    DropIndex {
        table: String,
        index_name: String,
    },
    ListIndexes {
        table: String,
    },
    CreateProcedure {
        name: String,
        body: String,
    },
    AlterProcedure {
        name: String,
        body: String,
    },
    ExecuteProcedure {
        name: String,
        args: Vec<Value>,
    },
    Transaction,
    Commit,
    Rollback,
    Unknown,
}

impl Operation {
    /// The table this operation targets, if any. Used to compute the set of
    /// resources the transaction manager must lock and shadow.
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Operation::Read { table, .. }
            | Operation::Insert { table, .. }
            | Operation::Delete { table, .. }
            | Operation::Update { table, .. }
            | Operation::Alter { table, .. }
            | Operation::DropTable { table }
            | Operation::CreateIndex { table, .. }
            | Operation::DropIndex { table, .. }
            | Operation::ListIndexes { table } => Some(table),
            Operation::CreateTable { metadata } => Some(&metadata.name),
            _ => None,
        }
    }

    /// Whether this operation writes or performs DDL, per
    /// `SPEC_FULL.md` §4.4's `DetermineLockType` rule.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Operation::Read { .. }
                | Operation::ListIndexes { .. }
                | Operation::Transaction
                | Operation::Commit
                | Operation::Rollback
                | Operation::Unknown
        )
    }
}

/// The total result of executing one `Operation`. Every operation yields
/// exactly one `OpResult`, with `error` set on failure
/// (`SPEC_FULL.md` §6's "Operation ingress" contract).
#[derive(Debug, Default)]
pub struct OpResult {
    pub rows: Option<Vec<Row>>,
    pub fields: Option<Vec<String>>,
    pub metadata: Option<TableMetadata>,
    pub index_metadata: Option<Vec<IndexMetadata>>,
    pub affected_count: Option<u64>,
    pub error: Option<Error>,
}

impl OpResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_error(error: Error) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_rows(fields: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            fields: Some(fields),
            rows: Some(rows),
            ..Self::default()
        }
    }

    pub fn with_affected(count: u64) -> Self {
        Self {
            affected_count: Some(count),
            ..Self::default()
        }
    }

    pub fn with_metadata(metadata: TableMetadata) -> Self {
        Self {
            metadata: Some(metadata),
            ..Self::default()
        }
    }

    pub fn with_indexes(indexes: Vec<IndexMetadata>) -> Self {
        Self {
            index_metadata: Some(indexes),
            ..Self::default()
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("id", DataType::Integer64),
            Column::new("name", DataType::String).with_length(10),
        ]
    }

    #[test]
    fn compare_predicate_matches_expected_rows() {
        let cols = columns();
        let row = Row::new(vec![Value::Integer(5), Value::String("a".into())]);
        let p = Predicate::Compare {
            column: "id".into(),
            op: CompareOp::Gt,
            value: Value::Integer(3),
        };
        assert!(p.eval(&row, &cols).unwrap());

        let p2 = Predicate::Compare {
            column: "id".into(),
            op: CompareOp::Lt,
            value: Value::Integer(3),
        };
        assert!(!p2.eval(&row, &cols).unwrap());
    }

    #[test]
    fn unknown_column_in_predicate_is_invalid_data() {
        let cols = columns();
        let row = Row::new(vec![Value::Integer(5), Value::String("a".into())]);
        let p = Predicate::Compare {
            column: "nope".into(),
            op: CompareOp::Eq,
            value: Value::Integer(1),
        };
        assert!(matches!(p.eval(&row, &cols), Err(Error::InvalidData(_))));
    }

    #[test]
    fn null_comparisons_are_always_false_except_is_null() {
        let cols = columns();
        let row = Row::new(vec![Value::Null, Value::String("a".into())]);
        let eq = Predicate::Compare {
            column: "id".into(),
            op: CompareOp::Eq,
            value: Value::Integer(1),
        };
        assert!(!eq.eval(&row, &cols).unwrap());

        let is_null = Predicate::IsNull("id".into());
        assert!(is_null.eval(&row, &cols).unwrap());
    }

    #[test]
    fn and_or_not_compose() {
        let cols = columns();
        let row = Row::new(vec![Value::Integer(5), Value::String("a".into())]);
        let gt = Predicate::Compare {
            column: "id".into(),
            op: CompareOp::Gt,
            value: Value::Integer(1),
        };
        let lt = Predicate::Compare {
            column: "id".into(),
            op: CompareOp::Lt,
            value: Value::Integer(10),
        };
        let both = Predicate::And(Box::new(gt.clone()), Box::new(lt.clone()));
        assert!(both.eval(&row, &cols).unwrap());

        let not_gt = Predicate::Not(Box::new(gt));
        assert!(!not_gt.eval(&row, &cols).unwrap());
    }

    #[test]
    fn is_write_classifies_operations_correctly() {
        assert!(!Operation::Read {
            table: "t".into(),
            fields: vec![],
            predicate: None
        }
        .is_write());
        assert!(Operation::Insert {
            table: "t".into(),
            rows: vec![]
        }
        .is_write());
        assert!(Operation::DropTable { table: "t".into() }.is_write());
    }
}
