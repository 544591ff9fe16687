//! In-memory replica fake used by the unit tests.
//!
//! Understands exactly the statement shapes produced by
//! `crate::reconcile::sql`, plus `CREATE TABLE` and a catch-all that only
//! records the statement.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Connection, DatabaseClient, Row, RowSet, Value};
use crate::error::{Error, Result};
use crate::replica::{ConnectionSpec, ReplicaDescriptor};

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct MemoryServer {
    reachable: bool,
    fail_writes: bool,
    tables: HashMap<String, MemoryTable>,
}

/// Callback run when a server answers a table `SELECT`, with host and table
type SelectHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Default)]
struct Shared {
    servers: HashMap<String, MemoryServer>,
    events: Vec<String>,
    on_select: Option<SelectHook>,
}

/// Fake client; servers are keyed by the `host` of the connection spec
#[derive(Clone, Default)]
pub(crate) struct MemoryClient {
    shared: Arc<Mutex<Shared>>,
    connects: Arc<AtomicUsize>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reachable server and return a descriptor pointing at it
    pub fn add_replica(&self, host: &str) -> ReplicaDescriptor {
        let mut shared = self.shared.lock().unwrap();
        shared.servers.insert(
            host.to_string(),
            MemoryServer {
                reachable: true,
                ..Default::default()
            },
        );
        ReplicaDescriptor::parse(host, &format!("host={};user=test;password=test", host)).unwrap()
    }

    pub fn set_reachable(&self, host: &str, reachable: bool) {
        let mut shared = self.shared.lock().unwrap();
        shared.servers.get_mut(host).unwrap().reachable = reachable;
    }

    pub fn set_fail_writes(&self, host: &str, fail: bool) {
        let mut shared = self.shared.lock().unwrap();
        shared.servers.get_mut(host).unwrap().fail_writes = fail;
    }

    /// Create (or replace) a table holding the given rows
    pub fn load_table(&self, host: &str, table: &str, columns: &[&str], rows: Vec<Row>) {
        let mut shared = self.shared.lock().unwrap();
        shared.servers.get_mut(host).unwrap().tables.insert(
            table.to_string(),
            MemoryTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        );
    }

    /// Rows of a table sorted by the first column, `None` if it does not exist
    pub fn rows(&self, host: &str, table: &str) -> Option<Vec<Row>> {
        let shared = self.shared.lock().unwrap();
        shared.servers.get(host)?.tables.get(table).map(|t| sorted(&t.rows))
    }

    /// Run `hook` whenever a table is read with `SELECT`
    pub fn on_select(&self, hook: impl Fn(&str, &str) + Send + Sync + 'static) {
        self.shared.lock().unwrap().on_select = Some(Arc::new(hook));
    }

    /// Number of connection attempts made so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(AtomicOrdering::SeqCst)
    }

    /// Ordered log of `connect:<host>` and `<verb>:<host>:<detail>` events
    pub fn events(&self) -> Vec<String> {
        self.shared.lock().unwrap().events.clone()
    }
}

#[async_trait]
impl DatabaseClient for MemoryClient {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, AtomicOrdering::SeqCst);
        let host = spec.get("host").unwrap_or_default().to_string();

        let mut shared = self.shared.lock().unwrap();
        let reachable = shared.servers.get(&host).map(|s| s.reachable).unwrap_or(false);
        if !reachable {
            return Err(Error::ConnectionFailed {
                replica: host,
                reason: "connection refused".into(),
            });
        }
        shared.events.push(format!("connect:{}", host));

        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            host,
        }))
    }
}

struct MemoryConnection {
    shared: Arc<Mutex<Shared>>,
    host: String,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, statement: &str, params: &[Value]) -> Result<RowSet> {
        let mut shared = self.shared.lock().unwrap();
        let Shared { servers, events, on_select } = &mut *shared;
        let server = servers
            .get_mut(&self.host)
            .filter(|s| s.reachable)
            .ok_or_else(|| Error::ConnectionFailed {
                replica: self.host.clone(),
                reason: "connection lost".into(),
            })?;

        if statement.starts_with("SELECT COLUMN_NAME FROM information_schema.columns") {
            let table = match params.first() {
                Some(Value::String(t)) => t.as_str(),
                _ => return Err(Error::QueryExecution("missing table parameter".into())),
            };
            let rows = server
                .tables
                .get(table)
                .map(|t| t.columns.iter().map(|c| vec![Value::String(c.clone())]).collect())
                .unwrap_or_default();
            return Ok(RowSet {
                columns: vec!["COLUMN_NAME".into()],
                rows,
                rows_affected: 0,
            });
        }

        if let Some(table) = quoted_after(statement, "DELETE FROM `") {
            let table_state = writable_table(server, &table)?;
            let removed = table_state.rows.len() as u64;
            table_state.rows.clear();
            events.push(format!("delete:{}:{}", self.host, table));
            return Ok(RowSet { rows_affected: removed, ..Default::default() });
        }

        if let Some(table) = quoted_after(statement, "INSERT INTO `") {
            let table_state = writable_table(server, &table)?;
            let row = params.to_vec();
            match table_state.rows.iter_mut().find(|r| r.first() == row.first()) {
                Some(existing) => *existing = row,
                None => table_state.rows.push(row),
            }
            events.push(format!("insert:{}:{}", self.host, table));
            return Ok(RowSet { rows_affected: 1, ..Default::default() });
        }

        if statement.starts_with("CREATE TABLE") {
            if server.fail_writes {
                return Err(Error::QueryExecution("write rejected".into()));
            }
            let table = quoted_after(statement, "EXISTS `")
                .or_else(|| quoted_after(statement, "TABLE `"))
                .ok_or_else(|| Error::QueryExecution("unparsable CREATE TABLE".into()))?;
            server.tables.entry(table.clone()).or_default();
            events.push(format!("create:{}:{}", self.host, table));
            return Ok(RowSet::default());
        }

        if statement.starts_with("SELECT") {
            if let Some(table) = quoted_after(statement, "FROM `") {
                let table_state = server.tables.get(&table).ok_or_else(|| {
                    Error::QueryExecution(format!("Table '{}' doesn't exist", table))
                })?;
                events.push(format!("select:{}:{}", self.host, table));
                if let Some(hook) = on_select {
                    (**hook)(&self.host, &table);
                }
                return Ok(RowSet {
                    columns: table_state.columns.clone(),
                    rows: sorted(&table_state.rows),
                    rows_affected: 0,
                });
            }
        }

        if server.fail_writes {
            return Err(Error::QueryExecution("write rejected".into()));
        }
        events.push(format!("exec:{}:{}", self.host, statement));
        Ok(RowSet { rows_affected: 1, ..Default::default() })
    }

    async fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.events.push(format!("commit:{}", self.host));
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn writable_table<'a>(server: &'a mut MemoryServer, table: &str) -> Result<&'a mut MemoryTable> {
    if server.fail_writes {
        return Err(Error::QueryExecution("write rejected".into()));
    }
    server
        .tables
        .get_mut(table)
        .ok_or_else(|| Error::QueryExecution(format!("Table '{}' doesn't exist", table)))
}

/// Backtick-quoted identifier following `prefix`
fn quoted_after(statement: &str, prefix: &str) -> Option<String> {
    let start = statement.find(prefix)? + prefix.len();
    let end = statement[start..].find('`')? + start;
    Some(statement[start..end].to_string())
}

fn sorted(rows: &[Row]) -> Vec<Row> {
    let mut rows = rows.to_vec();
    rows.sort_by(|a, b| match (a.first(), b.first()) {
        (Some(x), Some(y)) => compare(x, y),
        _ => Ordering::Equal,
    });
    rows
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::UInt(x), Value::UInt(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
