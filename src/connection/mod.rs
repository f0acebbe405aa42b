//! Connection manager
//!
//! Lazily opened, self-healing connections to the server:
//! - `ManagedConnection`: one connection behind an async lock, opened on
//!   first use through a retry cool-down, discarded on fatal errors and
//!   re-targeted when the connection string changes
//! - `ConnectionPool`: independent reader and writer connections selected
//!   round-robin
//! - `QueryExecutor`: the seam the schema catalog runs introspection through

pub mod error;
pub mod managed;
pub mod params;
pub mod pool;
pub mod retry;

use async_trait::async_trait;
use mysql_async::{Row, Value};

pub use error::{ConnectionError, ConnectionResult};
pub use managed::{ConnectionState, ManagedConnection};
pub use params::ParamValues;
pub use pool::ConnectionPool;
pub use retry::RetryWithCooldown;

/// Executes plain statement text and returns rows as text
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a statement that returns rows
    async fn query_rows(&self, sql: &str) -> ConnectionResult<Vec<TextRow>>;

    /// Run a statement that returns no rows; yields the affected row count
    async fn execute(&self, sql: &str) -> ConnectionResult<u64>;
}

/// One result row with every value rendered as text
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextRow {
    columns: Vec<String>,
    values: Vec<Option<String>>,
}

impl TextRow {
    pub fn new(columns: Vec<String>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    /// Build from `(column, value)` pairs
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Option<&'a str>)>) -> Self {
        let (columns, values) = pairs
            .into_iter()
            .map(|(c, v)| (c.to_string(), v.map(str::to_string)))
            .unzip();
        Self { columns, values }
    }

    pub fn from_row(row: Row) -> Self {
        let columns = row
            .columns_ref()
            .iter()
            .map(|c| c.name_str().into_owned())
            .collect();
        // A taken value reads as NULL
        let values = row
            .unwrap_raw()
            .into_iter()
            .map(|v| v.and_then(value_to_text))
            .collect();
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `index`; `None` for NULL or out of range
    pub fn get_index(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    /// Value of `column` (case-insensitive); `None` for NULL or missing
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.get_index(i))
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Int(v) => Some(v.to_string()),
        Value::UInt(v) => Some(v.to_string()),
        other => Some(other.as_sql(true).trim_matches('\'').to_string()),
    }
}
