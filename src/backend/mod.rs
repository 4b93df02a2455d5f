//! Backend boundary - structured statements and the transaction seam.
//!
//! The core never builds SQL strings itself. It hands [`Statement`] values to a
//! [`Transaction`]; a SQL driver renders them with its [`SqlDialect`](crate::sql::SqlDialect),
//! while the in-memory engine interprets them directly.

mod memory;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::IsolationLevel;
use crate::error::Result;
use crate::schema::SchemaCommand;
use crate::sql::SqlDialect;

pub use memory::MemoryBackend;

/// A row as a column-name to value map.
pub type Row = serde_json::Map<String, Value>;

/// Predicate over a single table's rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    NotEq(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    Lt(String, Value),
    Le(String, Value),
    StartsWith(String, String),
    In(String, Vec<Value>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn not_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::NotEq(column.into(), value.into())
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(column.into(), value.into())
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ge(column.into(), value.into())
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(column.into(), value.into())
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Le(column.into(), value.into())
    }

    pub fn starts_with(column: impl Into<String>, prefix: impl Into<String>) -> Self {
        Filter::StartsWith(column.into(), prefix.into())
    }

    pub fn is_in<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    /// Conjunction, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), f) => {
                left.push(f);
                Filter::And(left)
            }
            (f, other) => Filter::And(vec![f, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::Or(mut left), f) => {
                left.push(f);
                Filter::Or(left)
            }
            (f, other) => Filter::Or(vec![f, other]),
        }
    }

    /// Evaluate the predicate against a row. Missing columns read as `NULL`.
    pub fn matches(&self, row: &Row) -> bool {
        let get = |column: &str| row.get(column).unwrap_or(&Value::Null);
        match self {
            Filter::All => true,
            Filter::Eq(c, v) => values_equal(get(c), v),
            Filter::NotEq(c, v) => !get(c).is_null() && !values_equal(get(c), v),
            Filter::Gt(c, v) => compare_values(get(c), v) == Some(Ordering::Greater),
            Filter::Ge(c, v) => matches!(
                compare_values(get(c), v),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lt(c, v) => compare_values(get(c), v) == Some(Ordering::Less),
            Filter::Le(c, v) => matches!(
                compare_values(get(c), v),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::StartsWith(c, prefix) => get(c)
                .as_str()
                .map(|s| s.starts_with(prefix.as_str()))
                .unwrap_or(false),
            Filter::In(c, values) => values.iter().any(|v| values_equal(get(c), v)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
        }
    }
}

/// SQL-style equality: `NULL` never equals anything, numbers compare by value.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        return false;
    }
    compare_values(left, right) == Some(Ordering::Equal)
}

/// Total order within a value family; `None` across families or with `NULL`.
pub(crate) fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            (left == right).then_some(Ordering::Equal)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

/// A parameterized statement against one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Insert one row. Tables with an identity column report the generated id.
    Insert { table: String, row: Row },
    Update {
        table: String,
        values: Row,
        filter: Filter,
    },
    Delete { table: String, filter: Filter },
    Select {
        table: String,
        filter: Filter,
        order_by: Vec<OrderBy>,
        page: Option<Page>,
    },
    /// Yields one row `{ "count": n }`.
    Count { table: String, filter: Filter },
    /// Yields one row `{ "max": value }`, `null` on an empty match.
    Max {
        table: String,
        column: String,
        filter: Filter,
    },
    Schema(SchemaCommand),
}

impl Statement {
    pub fn select(table: impl Into<String>, filter: Filter) -> Self {
        Statement::Select {
            table: table.into(),
            filter,
            order_by: Vec::new(),
            page: None,
        }
    }

    /// Table the statement targets.
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. }
            | Statement::Select { table, .. }
            | Statement::Count { table, .. }
            | Statement::Max { table, .. } => table,
            Statement::Schema(command) => command.table(),
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Statement::Select { .. } | Statement::Count { .. } | Statement::Max { .. }
        )
    }
}

/// Result of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// One open backend transaction on one connection.
#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<Outcome>;

    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>>;

    /// Run several write statements in one round trip.
    async fn execute_batch(&mut self, statements: &[Statement]) -> Result<Vec<Outcome>> {
        let mut outcomes = Vec::with_capacity(statements.len());
        for statement in statements {
            outcomes.push(self.execute(statement).await?);
        }
        Ok(outcomes)
    }

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Connection factory for a relational engine.
#[async_trait]
pub trait Backend: Send + Sync {
    fn dialect(&self) -> &dyn SqlDialect;

    /// Open a connection and start a transaction on it.
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn Transaction>>;
}
