//! Typed filter expressions rendered to parameterized SQL.
//!
//! Identifiers are validated once when an [`Ident`] is built and always
//! rendered quoted; values only ever travel as bind parameters.

use std::fmt;

use crate::config::is_identifier;
use crate::db::params::SqlValue;
use crate::error::{DbError, DbResult};

/// A validated, optionally schema-qualified identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    schema: Option<String>,
    name: String,
}

impl Ident {
    pub fn new(name: &str) -> DbResult<Self> {
        Ok(Self {
            schema: None,
            name: checked(name)?,
        })
    }

    pub fn qualified(schema: &str, name: &str) -> DbResult<Self> {
        Ok(Self {
            schema: Some(checked(schema)?),
            name: checked(name)?,
        })
    }
}

fn checked(name: &str) -> DbResult<String> {
    if is_identifier(name) {
        Ok(name.to_string())
    } else {
        Err(DbError::ConfigInvalid(format!(
            "{name:?} is not a valid identifier"
        )))
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "\"{}\".\"{}\"", schema, self.name),
            None => write!(f, "\"{}\"", self.name),
        }
    }
}

/// Comparison operator of a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    ILike,
    IsNull,
    IsNotNull,
}

impl Op {
    fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::ILike => "ILIKE",
            Op::IsNull => "IS NULL",
            Op::IsNotNull => "IS NOT NULL",
        }
    }

    fn takes_value(self) -> bool {
        !matches!(self, Op::IsNull | Op::IsNotNull)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Condition {
    column: Ident,
    op: Op,
    value: Option<SqlValue>,
}

#[derive(Debug, Clone, PartialEq)]
enum Order {
    Asc(Ident),
    Desc(Ident),
}

/// Conjunction of `(column, operator, value)` constraints plus ordering and limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
    order: Vec<Order>,
    limit: Option<i64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `column <op> value`.
    pub fn and(mut self, column: &str, op: Op, value: impl Into<SqlValue>) -> DbResult<Self> {
        let value = op.takes_value().then(|| value.into());
        self.conditions.push(Condition {
            column: Ident::new(column)?,
            op,
            value,
        });
        Ok(self)
    }

    /// Adds `column IS NULL` or `column IS NOT NULL`.
    pub fn and_null(mut self, column: &str, is_null: bool) -> DbResult<Self> {
        self.conditions.push(Condition {
            column: Ident::new(column)?,
            op: if is_null { Op::IsNull } else { Op::IsNotNull },
            value: None,
        });
        Ok(self)
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> DbResult<Self> {
        let column = Ident::new(column)?;
        self.order.push(if descending {
            Order::Desc(column)
        } else {
            Order::Asc(column)
        });
        Ok(self)
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Render the `WHERE`/`ORDER BY`/`LIMIT` tail, numbering placeholders from `$1`.
    pub fn render(&self) -> (String, Vec<SqlValue>) {
        let mut sql = String::new();
        let mut params = Vec::new();

        for (i, condition) in self.conditions.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            match &condition.value {
                Some(value) => {
                    params.push(value.clone());
                    sql.push_str(&format!(
                        "{} {} ${}",
                        condition.column,
                        condition.op.as_sql(),
                        params.len()
                    ));
                }
                None => {
                    sql.push_str(&format!("{} {}", condition.column, condition.op.as_sql()));
                }
            }
        }

        for (i, order) in self.order.iter().enumerate() {
            sql.push_str(if i == 0 { " ORDER BY " } else { ", " });
            match order {
                Order::Asc(column) => sql.push_str(&format!("{column} ASC")),
                Order::Desc(column) => sql.push_str(&format!("{column} DESC")),
            }
        }

        if let Some(limit) = self.limit {
            params.push(SqlValue::Int(limit));
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }

        (sql, params)
    }

    /// Render a full `SELECT *` over `relation`.
    pub fn select_from(&self, relation: &Ident) -> (String, Vec<SqlValue>) {
        let (tail, params) = self.render();
        (format!("SELECT * FROM {relation}{tail}"), params)
    }
}
