//! Recursive-descent parser for the reference SQL front end.
//!
//! Lowers the statement subset in `SPEC_FULL.md` §4.7 directly into
//! [`Operation`] values. Deliberately small: it is not where the
//! specification's correctness guarantees live.

use super::lexer::{tokenize, Token};
use crate::error::{Error, Result};
use crate::operation::{AlterOp, CompareOp, Operation, Predicate};
use crate::types::{Column, DataType, IndexMetadata, Row, TableMetadata, Value};

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            other => Err(Error::Syntax(format!("expected identifier, found {:?}", other))),
        }
    }

    fn keyword(&self) -> Option<String> {
        match self.peek() {
            Token::Ident(s) => Some(s.to_ascii_uppercase()),
            _ => None,
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        match self.keyword() {
            Some(s) if s == kw => {
                self.advance();
                Ok(())
            }
            other => Err(Error::Syntax(format!(
                "expected '{}', found {:?}",
                kw, other
            ))),
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        self.keyword().as_deref() == Some(kw)
    }

    fn expect(&mut self, t: Token) -> Result<()> {
        if self.peek() == &t {
            self.advance();
            Ok(())
        } else {
            Err(Error::Syntax(format!(
                "expected {:?}, found {:?}",
                t,
                self.peek()
            )))
        }
    }

    fn parse_statement(&mut self) -> Result<Operation> {
        let keyword = self
            .keyword()
            .ok_or_else(|| Error::Syntax("expected a statement keyword".into()))?;

        let op = match keyword.as_str() {
            "CREATE" => self.parse_create()?,
            "DROP" => self.parse_drop()?,
            "INSERT" => self.parse_insert()?,
            "SELECT" => self.parse_select()?,
            "UPDATE" => self.parse_update()?,
            "DELETE" => self.parse_delete()?,
            "BEGIN" => {
                self.advance();
                Operation::Transaction
            }
            "COMMIT" => {
                self.advance();
                Operation::Commit
            }
            "ROLLBACK" => {
                self.advance();
                Operation::Rollback
            }
            other => return Err(Error::Syntax(format!("unrecognized statement '{}'", other))),
        };

        if self.peek() == &Token::Semicolon {
            self.advance();
        }
        Ok(op)
    }

    fn parse_create(&mut self) -> Result<Operation> {
        self.advance(); // CREATE
        let keyword = self
            .keyword()
            .ok_or_else(|| Error::Syntax("expected TABLE or INDEX after CREATE".into()))?;
        match keyword.as_str() {
            "TABLE" => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(Token::LParen)?;
                let mut columns = Vec::new();
                loop {
                    columns.push(self.parse_column_def()?);
                    if self.peek() == &Token::Comma {
                        self.advance();
                        continue;
                    }
                    break;
                }
                self.expect(Token::RParen)?;
                Ok(Operation::CreateTable {
                    metadata: TableMetadata::new(name, columns),
                })
            }
            "INDEX" => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect_keyword("ON")?;
                let table = self.expect_ident()?;
                self.expect(Token::LParen)?;
                let mut columns = Vec::new();
                loop {
                    columns.push(self.expect_ident()?);
                    if self.peek() == &Token::Comma {
                        self.advance();
                        continue;
                    }
                    break;
                }
                self.expect(Token::RParen)?;
                Ok(Operation::CreateIndex {
                    table,
                    index: IndexMetadata {
                        name,
                        columns,
                        unique: false,
                    },
                })
            }
            other => Err(Error::Syntax(format!(
                "expected TABLE or INDEX after CREATE, found '{}'",
                other
            ))),
        }
    }

    fn parse_column_def(&mut self) -> Result<Column> {
        let name = self.expect_ident()?;
        let type_name = self.expect_ident()?.to_ascii_uppercase();
        let mut column = match type_name.as_str() {
            "INTEGER" | "INT" | "INTEGER64" => Column::new(&name, DataType::Integer64),
            "FLOAT" | "FLOAT64" | "DOUBLE" => Column::new(&name, DataType::Float64),
            "BOOLEAN" | "BOOL" => Column::new(&name, DataType::Boolean),
            "TIMESTAMP" => Column::new(&name, DataType::Timestamp),
            "DATETIME" => Column::new(&name, DataType::Datetime),
            "STRING" | "VARCHAR" | "TEXT" => {
                let length = if self.peek() == &Token::LParen {
                    self.advance();
                    let len = match self.advance() {
                        Token::Integer(n) => n as u16,
                        other => {
                            return Err(Error::Syntax(format!(
                                "expected a length, found {:?}",
                                other
                            )))
                        }
                    };
                    self.expect(Token::RParen)?;
                    len
                } else {
                    255
                };
                Column::new(&name, DataType::String).with_length(length)
            }
            other => return Err(Error::Syntax(format!("unknown column type '{}'", other))),
        };

        loop {
            match self.keyword().as_deref() {
                Some("NOT") => {
                    self.advance();
                    self.expect_keyword("NULL")?;
                    column = column.not_null();
                }
                Some("PRIMARY") => {
                    self.advance();
                    self.expect_keyword("KEY")?;
                    column = column.primary_key();
                }
                _ => break,
            }
        }
        Ok(column)
    }

    fn parse_drop(&mut self) -> Result<Operation> {
        self.advance(); // DROP
        let keyword = self
            .keyword()
            .ok_or_else(|| Error::Syntax("expected TABLE or INDEX after DROP".into()))?;
        match keyword.as_str() {
            "TABLE" => {
                self.advance();
                let table = self.expect_ident()?;
                Ok(Operation::DropTable { table })
            }
            "INDEX" => {
                self.advance();
                let index_name = self.expect_ident()?;
                self.expect_keyword("ON")?;
                let table = self.expect_ident()?;
                Ok(Operation::DropIndex { table, index_name })
            }
            other => Err(Error::Syntax(format!(
                "expected TABLE or INDEX after DROP, found '{}'",
                other
            ))),
        }
    }

    fn parse_insert(&mut self) -> Result<Operation> {
        self.advance(); // INSERT
        self.expect_keyword("INTO")?;
        let table = self.expect_ident()?;

        let mut columns = Vec::new();
        if self.peek() == &Token::LParen {
            self.advance();
            loop {
                columns.push(self.expect_ident()?);
                if self.peek() == &Token::Comma {
                    self.advance();
                    continue;
                }
                break;
            }
            self.expect(Token::RParen)?;
        }

        self.expect_keyword("VALUES")?;
        self.expect(Token::LParen)?;
        let mut values = Vec::new();
        loop {
            values.push(self.parse_literal()?);
            if self.peek() == &Token::Comma {
                self.advance();
                continue;
            }
            break;
        }
        self.expect(Token::RParen)?;

        if !columns.is_empty() && columns.len() != values.len() {
            return Err(Error::column_count_mismatch(columns.len(), values.len()));
        }

        Ok(Operation::Insert {
            table,
            rows: vec![Row::new(values)],
        })
    }

    fn parse_literal(&mut self) -> Result<Value> {
        match self.advance() {
            Token::Integer(n) => Ok(Value::Integer(n)),
            Token::Float(f) => Ok(Value::Float(f)),
            Token::String(s) => Ok(Value::String(s)),
            Token::Ident(s) if s.eq_ignore_ascii_case("NULL") => Ok(Value::Null),
            Token::Ident(s) if s.eq_ignore_ascii_case("TRUE") => Ok(Value::Boolean(true)),
            Token::Ident(s) if s.eq_ignore_ascii_case("FALSE") => Ok(Value::Boolean(false)),
            other => Err(Error::Syntax(format!("expected a literal, found {:?}", other))),
        }
    }

    fn parse_select(&mut self) -> Result<Operation> {
        self.advance(); // SELECT
        let mut fields = Vec::new();
        if self.peek() == &Token::Star {
            self.advance();
        } else {
            loop {
                fields.push(self.expect_ident()?);
                if self.peek() == &Token::Comma {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect_keyword("FROM")?;
        let table = self.expect_ident()?;

        let predicate = if self.at_keyword("WHERE") {
            self.advance();
            Some(self.parse_predicate()?)
        } else {
            None
        };

        Ok(Operation::Read {
            table,
            fields,
            predicate,
        })
    }

    fn parse_update(&mut self) -> Result<Operation> {
        self.advance(); // UPDATE
        let table = self.expect_ident()?;
        self.expect_keyword("SET")?;

        let mut assignments = Vec::new();
        loop {
            let column = self.expect_ident()?;
            self.expect(Token::Eq)?;
            let value = self.parse_literal()?;
            assignments.push((column, value));
            if self.peek() == &Token::Comma {
                self.advance();
                continue;
            }
            break;
        }

        let predicate = if self.at_keyword("WHERE") {
            self.advance();
            Some(self.parse_predicate()?)
        } else {
            None
        };

        Ok(Operation::Update {
            table,
            assignments,
            predicate,
        })
    }

    fn parse_delete(&mut self) -> Result<Operation> {
        self.advance(); // DELETE
        self.expect_keyword("FROM")?;
        let table = self.expect_ident()?;

        let predicate = if self.at_keyword("WHERE") {
            self.advance();
            Some(self.parse_predicate()?)
        } else {
            None
        };

        Ok(Operation::Delete { table, predicate })
    }

    /// `predicate := and_term (OR and_term)*`
    fn parse_predicate(&mut self) -> Result<Predicate> {
        let mut lhs = self.parse_and_term()?;
        while self.at_keyword("OR") {
            self.advance();
            let rhs = self.parse_and_term()?;
            lhs = Predicate::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    /// `and_term := unary (AND unary)*`
    fn parse_and_term(&mut self) -> Result<Predicate> {
        let mut lhs = self.parse_unary_predicate()?;
        while self.at_keyword("AND") {
            self.advance();
            let rhs = self.parse_unary_predicate()?;
            lhs = Predicate::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary_predicate(&mut self) -> Result<Predicate> {
        if self.at_keyword("NOT") {
            self.advance();
            return Ok(Predicate::Not(Box::new(self.parse_unary_predicate()?)));
        }
        if self.peek() == &Token::LParen {
            self.advance();
            let inner = self.parse_predicate()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }

        let column = self.expect_ident()?;
        if self.at_keyword("IS") {
            self.advance();
            if self.at_keyword("NOT") {
                self.advance();
                self.expect_keyword("NULL")?;
                return Ok(Predicate::IsNotNull(column));
            }
            self.expect_keyword("NULL")?;
            return Ok(Predicate::IsNull(column));
        }

        let op = match self.advance() {
            Token::Eq => CompareOp::Eq,
            Token::NotEq => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            other => {
                return Err(Error::Syntax(format!(
                    "expected a comparison operator, found {:?}",
                    other
                )))
            }
        };
        let value = self.parse_literal()?;
        Ok(Predicate::Compare { column, op, value })
    }
}

/// Parse one statement, dropping a trailing `;` and ignoring blank input
/// (empty lines and a pure comment yield [`Operation::Unknown`] for the
/// REPL to skip silently).
pub fn parse(input: &str) -> Result<Operation> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Operation::Unknown);
    }

    let tokens = tokenize(trimmed)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_statement()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_table_with_constraints() {
        let op = parse("CREATE TABLE users (id INTEGER NOT NULL PRIMARY KEY, name STRING(32))").unwrap();
        match op {
            Operation::CreateTable { metadata } => {
                assert_eq!(metadata.name, "users");
                assert_eq!(metadata.columns.len(), 2);
                assert!(!metadata.columns[0].nullable);
                assert_eq!(metadata.columns[1].length, 32);
            }
            other => panic!("expected CreateTable, got {:?}", other),
        }
    }

    #[test]
    fn parses_insert_with_explicit_columns() {
        let op = parse("INSERT INTO users (id, name) VALUES (1, 'ada')").unwrap();
        match op {
            Operation::Insert { table, rows } => {
                assert_eq!(table, "users");
                assert_eq!(rows[0].values.len(), 2);
            }
            other => panic!("expected Insert, got {:?}", other),
        }
    }

    #[test]
    fn parses_select_star_with_where() {
        let op = parse("SELECT * FROM users WHERE id = 1 AND name = 'ada'").unwrap();
        match op {
            Operation::Read {
                table,
                fields,
                predicate,
            } => {
                assert_eq!(table, "users");
                assert!(fields.is_empty());
                assert!(matches!(predicate, Some(Predicate::And(_, _))));
            }
            other => panic!("expected Read, got {:?}", other),
        }
    }

    #[test]
    fn parses_update_with_set_and_where() {
        let op = parse("UPDATE users SET name = 'grace' WHERE id = 2").unwrap();
        assert!(matches!(op, Operation::Update { .. }));
    }

    #[test]
    fn parses_delete_without_where() {
        let op = parse("DELETE FROM users").unwrap();
        match op {
            Operation::Delete { predicate, .. } => assert!(predicate.is_none()),
            other => panic!("expected Delete, got {:?}", other),
        }
    }

    #[test]
    fn parses_transaction_keywords() {
        assert!(matches!(parse("BEGIN").unwrap(), Operation::Transaction));
        assert!(matches!(parse("COMMIT").unwrap(), Operation::Commit));
        assert!(matches!(parse("ROLLBACK").unwrap(), Operation::Rollback));
    }

    #[test]
    fn unknown_statement_is_syntax_error() {
        assert!(parse("FROBNICATE users").is_err());
    }

    #[test]
    fn blank_input_is_unknown() {
        assert!(matches!(parse("   ").unwrap(), Operation::Unknown));
    }
}
