// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generic tabular results and the role-scoped read relation behind the
//! ad-hoc query path.
//!
//! Ad-hoc queries are caller-defined, so rows come back as typed columns
//! and cell values rather than domain records. The only readable relation
//! is `item_read`, which takes the caller's role list as its bound
//! parameter; the sanitizer upstream guarantees queries arrive in this
//! form.

use serde::{Deserialize, Serialize};

use crate::{
    store::{Access, MemStore, DEFAULT_MAX_ROWS},
    ItemRecord, Result, StoreError,
};

/// The role-scoped read relation referenced by rewritten queries.
pub const READ_RELATION: &str = "item_read";

/// Placeholder for the trailing role-list parameter.
pub const ROLES_PARAM: &str = "$roles";

/// Column type of a tabular result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int,
    Float,
    String,
}

/// A typed, named column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub dtype: DataType,
}

/// One cell of a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Caller-defined query results: typed columns plus row values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularData {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Cell>>,
}

/// A validated, rewritten read query. Produced by the sanitizer; the role
/// list is always the final bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedQuery {
    /// Rewritten query text referencing `item_read($roles)`.
    pub text: String,
    /// The caller's role scope, bound as the trailing parameter.
    pub roles: Vec<String>,
}

/// Columns exposed by the `item_read` relation, with their types.
const ITEM_COLUMNS: [(&str, DataType); 8] = [
    ("key", DataType::String),
    ("name", DataType::String),
    ("description", DataType::String),
    ("status", DataType::Int),
    ("item_type", DataType::String),
    ("partition", DataType::String),
    ("version", DataType::Int),
    ("changed_by", DataType::String),
];

fn column_type(name: &str) -> Option<DataType> {
    ITEM_COLUMNS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, t)| *t)
}

fn cell_for(record: &ItemRecord, column: &str) -> Cell {
    match column {
        "key" => Cell::String(record.key.clone()),
        "name" => Cell::String(record.name.clone()),
        "description" => Cell::String(record.description.clone()),
        "status" => Cell::Int(i64::from(record.status)),
        "item_type" => Cell::String(record.item_type.clone()),
        "partition" => Cell::String(record.partition.clone()),
        "version" => Cell::Int(record.version),
        "changed_by" => Cell::String(record.changed_by.clone()),
        _ => Cell::Null,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(i64),
    Str(String),
    Star,
    Comma,
    LParen,
    RParen,
    Eq,
    RolesParam,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            },
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            },
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            },
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            },
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            },
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            },
            '\'' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => s.push(ch),
                        None => {
                            return Err(StoreError::Query("unterminated string literal".into()))
                        },
                    }
                }
                tokens.push(Token::Str(s));
            },
            '$' => {
                chars.next();
                let mut name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name != "roles" {
                    return Err(StoreError::Query(format!("unknown parameter '${name}'")));
                }
                tokens.push(Token::RolesParam);
            },
            c if c.is_ascii_digit() || c == '-' => {
                chars.next();
                let mut num = String::from(c);
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_digit() {
                        num.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = num
                    .parse::<i64>()
                    .map_err(|_| StoreError::Query(format!("invalid number '{num}'")))?;
                tokens.push(Token::Number(value));
            },
            c if c.is_ascii_alphabetic() || c == '_' => {
                chars.next();
                let mut ident = String::from(c);
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident.to_lowercase()));
            },
            other => {
                return Err(StoreError::Query(format!(
                    "unexpected character '{other}' in query"
                )))
            },
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        match self.next() {
            Some(Token::Ident(ref w)) if w == kw => Ok(()),
            other => Err(StoreError::Query(format!(
                "expected '{kw}', found {other:?}"
            ))),
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        match self.next() {
            Some(ref t) if t == token => Ok(()),
            other => Err(StoreError::Query(format!(
                "expected {token:?}, found {other:?}"
            ))),
        }
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Ident(w)) if w == kw)
    }
}

/// One parsed equality predicate.
struct Predicate {
    column: String,
    value: Cell,
}

impl MemStore {
    /// Execute a sanitized read query against the role-scoped item view.
    ///
    /// Supported form:
    /// `select <cols|*> from item_read($roles) [where col = lit [and ...]] [limit n]`
    pub fn select(&self, query: &SanitizedQuery) -> Result<TabularData> {
        let mut parser = Parser {
            tokens: tokenize(&query.text)?,
            pos: 0,
        };
        parser.expect_keyword("select")?;

        let mut wanted: Vec<String> = Vec::new();
        let star = matches!(parser.tokens.get(parser.pos), Some(Token::Star));
        if star {
            parser.next();
        } else {
            loop {
                match parser.next() {
                    Some(Token::Ident(col)) => wanted.push(col),
                    other => {
                        return Err(StoreError::Query(format!(
                            "expected column name, found {other:?}"
                        )))
                    },
                }
                if matches!(parser.tokens.get(parser.pos), Some(Token::Comma)) {
                    parser.next();
                } else {
                    break;
                }
            }
        }
        if star {
            wanted = ITEM_COLUMNS.iter().map(|(n, _)| (*n).to_string()).collect();
        }
        for col in &wanted {
            if column_type(col).is_none() {
                return Err(StoreError::Query(format!("unknown column '{col}'")));
            }
        }

        parser.expect_keyword("from")?;
        parser.expect_keyword(READ_RELATION)?;
        parser.expect(&Token::LParen)?;
        parser.expect(&Token::RolesParam)?;
        parser.expect(&Token::RParen)?;

        let mut predicates: Vec<Predicate> = Vec::new();
        if parser.peek_keyword("where") {
            parser.next();
            loop {
                let column = match parser.next() {
                    Some(Token::Ident(c)) => c,
                    other => {
                        return Err(StoreError::Query(format!(
                            "expected column in predicate, found {other:?}"
                        )))
                    },
                };
                if column_type(&column).is_none() {
                    return Err(StoreError::Query(format!("unknown column '{column}'")));
                }
                parser.expect(&Token::Eq)?;
                let value = match parser.next() {
                    Some(Token::Number(n)) => Cell::Int(n),
                    Some(Token::Str(s)) => Cell::String(s),
                    other => {
                        return Err(StoreError::Query(format!(
                            "expected literal in predicate, found {other:?}"
                        )))
                    },
                };
                predicates.push(Predicate { column, value });
                if parser.peek_keyword("and") {
                    parser.next();
                } else {
                    break;
                }
            }
        }

        let mut limit = DEFAULT_MAX_ROWS;
        if parser.peek_keyword("limit") {
            parser.next();
            match parser.next() {
                Some(Token::Number(n)) if n >= 0 => limit = n as usize,
                other => {
                    return Err(StoreError::Query(format!(
                        "expected row limit, found {other:?}"
                    )))
                },
            }
        }
        if parser.pos != parser.tokens.len() {
            return Err(StoreError::Query("trailing tokens in query".into()));
        }

        // Evaluate over the role-visible item view.
        let items = self.items.read();
        let mut visible: Vec<&ItemRecord> = items
            .values()
            .filter(|r| self.allowed(&query.roles, &r.partition, Access::Read))
            .filter(|r| {
                predicates
                    .iter()
                    .all(|p| cell_for(r, &p.column) == p.value)
            })
            .collect();
        visible.sort_by(|a, b| a.key.cmp(&b.key));
        visible.truncate(limit);

        let columns = wanted
            .iter()
            .map(|name| Column {
                name: name.clone(),
                dtype: column_type(name).unwrap_or(DataType::String),
            })
            .collect();
        let rows = visible
            .iter()
            .map(|r| wanted.iter().map(|c| cell_for(r, c)).collect())
            .collect();
        Ok(TabularData { columns, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{admin, plain_item_write, seeded_store};

    fn query(text: &str) -> SanitizedQuery {
        SanitizedQuery {
            text: text.to_string(),
            roles: admin(),
        }
    }

    fn populated() -> MemStore {
        let store = seeded_store();
        for (key, status) in [("web1", 1), ("web2", 1), ("db1", 2)] {
            let mut write = plain_item_write("host");
            write.name = key.to_uppercase();
            write.status = status;
            store.set_item(key, write, &admin()).unwrap();
        }
        store
    }

    #[test]
    fn projection_and_predicate() {
        let store = populated();
        let result = store
            .select(&query(
                "select key, status from item_read($roles) where status = 1",
            ))
            .unwrap();
        assert_eq!(result.columns.len(), 2);
        assert_eq!(result.columns[1].dtype, DataType::Int);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0][0], Cell::String("web1".into()));
    }

    #[test]
    fn star_selects_all_columns() {
        let store = populated();
        let result = store.select(&query("select * from item_read($roles)")).unwrap();
        assert_eq!(result.columns.len(), 8);
        assert_eq!(result.rows.len(), 3);
    }

    #[test]
    fn string_predicate_and_limit() {
        let store = populated();
        let result = store
            .select(&query(
                "select key from item_read($roles) where name = 'DB1' limit 1",
            ))
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0], Cell::String("db1".into()));
    }

    #[test]
    fn unknown_column_rejected() {
        let store = populated();
        let err = store
            .select(&query("select txt from item_read($roles)"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[test]
    fn raw_table_reference_rejected() {
        let store = populated();
        let err = store.select(&query("select key from item")).unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[test]
    fn roles_restrict_rows() {
        let store = populated();
        let result = store
            .select(&SanitizedQuery {
                text: "select key from item_read($roles)".into(),
                roles: vec!["nobody".to_string()],
            })
            .unwrap();
        assert!(result.rows.is_empty());
    }

    #[test]
    fn trailing_garbage_rejected() {
        let store = populated();
        let err = store
            .select(&query("select key from item_read($roles) extra"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
    }
}
