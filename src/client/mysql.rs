//! MariaDB Client
//!
//! `DatabaseClient` implementation on top of a single sqlx MySQL
//! connection per call.

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Connection as _, Executor, MySql, Row as _, TypeInfo, ValueRef};

use super::{Connection, DatabaseClient, Row, RowSet, Value};
use crate::error::{Error, Result};
use crate::replica::ConnectionSpec;

const HOST_KEYS: &[&str] = &["host", "server", "data source"];
const USER_KEYS: &[&str] = &["user", "username", "user id", "uid"];
const PASSWORD_KEYS: &[&str] = &["password", "pwd"];
const DATABASE_KEYS: &[&str] = &["database", "dbname", "initial catalog"];

/// Client that opens plain MariaDB/MySQL connections
#[derive(Debug, Clone, Default)]
pub struct MySqlClient;

impl MySqlClient {
    pub fn new() -> Self {
        Self
    }

    /// Translate a parsed connection spec into sqlx connect options
    pub fn connect_options(spec: &ConnectionSpec) -> Result<MySqlConnectOptions> {
        let host = spec
            .get_any(HOST_KEYS)
            .ok_or_else(|| Error::ConnectionSpec("missing host".into()))?;

        let mut options = MySqlConnectOptions::new().host(host);

        if let Some(port) = spec.get("port") {
            let port: u16 = port
                .parse()
                .map_err(|_| Error::ConnectionSpec(format!("port={}", port)))?;
            options = options.port(port);
        }
        if let Some(user) = spec.get_any(USER_KEYS) {
            options = options.username(user);
        }
        if let Some(password) = spec.get_any(PASSWORD_KEYS) {
            options = options.password(password);
        }
        if let Some(database) = spec.get_any(DATABASE_KEYS) {
            options = options.database(database);
        }

        Ok(options)
    }

    fn address(spec: &ConnectionSpec) -> String {
        let host = spec.get_any(HOST_KEYS).unwrap_or("?");
        match spec.get("port") {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}

#[async_trait]
impl DatabaseClient for MySqlClient {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn Connection>> {
        let options = Self::connect_options(spec)?;

        let conn = MySqlConnection::connect_with(&options)
            .await
            .map_err(|e| Error::ConnectionFailed {
                replica: Self::address(spec),
                reason: e.to_string(),
            })?;

        Ok(Box::new(MySqlReplicaConnection {
            conn,
            address: Self::address(spec),
            in_transaction: false,
        }))
    }
}

/// One open MariaDB connection
struct MySqlReplicaConnection {
    conn: MySqlConnection,
    /// `host:port`, for error reporting
    address: String,
    in_transaction: bool,
}

#[async_trait]
impl Connection for MySqlReplicaConnection {
    async fn execute(&mut self, statement: &str, params: &[Value]) -> Result<RowSet> {
        let query = params
            .iter()
            .fold(sqlx::query(statement), |query, value| bind_value(query, value));

        let mut result = RowSet::default();

        if !returns_rows(statement) {
            let done = query
                .execute(&mut self.conn)
                .await
                .map_err(|e| query_error(&self.address, statement, e))?;
            result.rows_affected = done.rows_affected();
            return Ok(result);
        }

        let mut stream = query.fetch(&mut self.conn);
        while let Some(row) = stream
            .try_next()
            .await
            .map_err(|e| query_error(&self.address, statement, e))?
        {
            if result.columns.is_empty() {
                result.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
            }
            result.rows.push(decode_row(&row)?);
        }

        Ok(result)
    }

    async fn begin(&mut self) -> Result<()> {
        // Unprepared text statement; START TRANSACTION cannot be prepared
        self.conn
            .execute("START TRANSACTION")
            .await
            .map_err(|e| query_error(&self.address, "START TRANSACTION", e))?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn
                .execute("COMMIT")
                .await
                .map_err(|e| query_error(&self.address, "COMMIT", e))?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if self.in_transaction {
            tracing::debug!("Closing connection with an open transaction; it will be rolled back");
        }
        self.conn.close().await?;
        Ok(())
    }
}

/// Statements answered with a result set rather than an OK packet
fn returns_rows(statement: &str) -> bool {
    let keyword: String = statement
        .trim_start()
        .trim_start_matches('(')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();

    matches!(
        keyword.to_ascii_uppercase().as_str(),
        "SELECT" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" | "WITH" | "VALUES" | "TABLE" | "CALL"
    )
}

/// Map a statement failure, keeping a lost connection recognizable as such
fn query_error(address: &str, statement: &str, e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            Error::ConnectionFailed {
                replica: address.to_string(),
                reason: e.to_string(),
            }
        }
        e => Error::QueryExecution(format!(
            "Failed to execute '{}...': {}",
            statement.chars().take(50).collect::<String>(),
            e
        )),
    }
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::UInt(u) => query.bind(*u),
        Value::Float(f) => query.bind(*f),
        Value::String(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
    }
}

fn decode_row(row: &MySqlRow) -> Result<Row> {
    (0..row.len()).map(|i| decode_column(row, i)).collect()
}

/// Decode one column into a `Value` based on its reported MySQL type
fn decode_column(row: &MySqlRow, index: usize) -> Result<Value> {
    let type_name = {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        raw.type_info().name().to_string()
    };

    let value = match type_name.as_str() {
        "BOOLEAN" => Value::Bool(row.try_get(index)?),
        name if name.ends_with(" UNSIGNED") => Value::UInt(row.try_get_unchecked(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            Value::Int(row.try_get_unchecked(index)?)
        }
        "FLOAT" => Value::Float(row.try_get::<f32, _>(index)? as f64),
        "DOUBLE" => Value::Float(row.try_get(index)?),
        "DATETIME" | "TIMESTAMP" => {
            let ts: chrono::NaiveDateTime = row.try_get(index)?;
            Value::String(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string())
        }
        "DATE" => {
            let date: chrono::NaiveDate = row.try_get(index)?;
            Value::String(date.to_string())
        }
        "TIME" => {
            let time: chrono::NaiveTime = row.try_get(index)?;
            Value::String(time.to_string())
        }
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
            Value::Bytes(row.try_get_unchecked(index)?)
        }
        // DECIMAL, CHAR, VARCHAR, TEXT, ENUM, SET, JSON arrive as strings
        _ => Value::String(row.try_get_unchecked(index)?),
    };

    Ok(value)
}
