//! Database Client Module
//!
//! The narrow database interface the balancer, health monitor and
//! reconciler talk to, plus the MariaDB implementation.

mod mysql;
#[cfg(test)]
pub(crate) mod memory;

pub use mysql::MySqlClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::replica::ConnectionSpec;

/// SQL value representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// One fetched row, values in column order
pub type Row = Vec<Value>;

/// Result of a single statement
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowSet {
    /// Column names of the result (empty for non-SELECT statements)
    pub columns: Vec<String>,
    /// Fetched rows
    pub rows: Vec<Row>,
    /// Rows affected by a data-modifying statement
    pub rows_affected: u64,
}

/// An open connection to one replica
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement with positional `?` parameters
    async fn execute(&mut self, statement: &str, params: &[Value]) -> Result<RowSet>;

    /// Start a transaction; statements up to `commit` are applied atomically
    async fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction (no-op without one)
    async fn commit(&mut self) -> Result<()>;

    /// Close the connection, rolling back anything uncommitted
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Factory for replica connections
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Open a connection; unreachable targets fail with `Error::ConnectionFailed`
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn Connection>>;
}
