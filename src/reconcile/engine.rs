//! Reconciliation Engine
//!
//! One pass per table: snapshot every active replica, pick the dataset
//! most replicas agree on, and rewrite the others from it.
//!
//! This is a majority heuristic, not a versioned resolution. It assumes
//! divergence is rare and has no answer when no two replicas agree
//! (including the two-replica split), in which case the pass is abandoned
//! until the next trigger.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use super::sql::{TableStatements, COLUMNS_QUERY};
use crate::client::{Connection, DatabaseClient, Row, Value};
use crate::error::Result;
use crate::replica::ReplicaDescriptor;

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Nothing to reconcile against
    NoActiveReplicas,
    /// No responding replica reports the table
    TableNotFound,
    /// The table's identifiers cannot be used safely
    InvalidSchema(String),
    /// The table exists but no replica could be read
    NoSnapshots,
    /// No dataset is held by a strict majority of agreeing replicas
    Indeterminate,
    /// Every snapshotted replica already matches the reference
    InSync { reference: String },
    /// Some replicas were rewritten from the reference
    Repaired {
        reference: String,
        repaired: Vec<String>,
        failed: Vec<String>,
    },
}

impl ReconcileOutcome {
    /// Reference replica chosen by the pass, if any
    pub fn reference(&self) -> Option<&str> {
        match self {
            ReconcileOutcome::InSync { reference } => Some(reference),
            ReconcileOutcome::Repaired { reference, .. } => Some(reference),
            _ => None,
        }
    }
}

/// Outcome of a pass for a named table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub table: String,
    pub outcome: ReconcileOutcome,
}

/// Per-pass table contents, one entry per replica that could be read,
/// in active-set order
#[derive(Debug, Clone, Default)]
pub struct ReconciliationSnapshot {
    entries: Vec<(String, Vec<Row>)>,
}

impl ReconciliationSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, replica: impl Into<String>, rows: Vec<Row>) {
        self.entries.push((replica.into(), rows));
    }

    pub fn rows(&self, replica: &str) -> Option<&[Row]> {
        self.entries
            .iter()
            .find(|(name, _)| name == replica)
            .map(|(_, rows)| rows.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of other replicas whose snapshot equals `replica`'s
    pub fn match_count(&self, replica: &str) -> usize {
        let Some(rows) = self.rows(replica) else {
            return 0;
        };
        self.entries
            .iter()
            .filter(|(name, other)| name != replica && other.as_slice() == rows)
            .count()
    }

    /// Replica holding the dataset with the strictly highest match count.
    ///
    /// Replicas with equal snapshots hold the same dataset, so they never
    /// tie with each other; the first of them in active order is returned.
    /// A tie between different datasets, or no matches at all, yields `None`.
    pub fn choose_reference(&self) -> Option<&str> {
        let scores: Vec<usize> = self
            .entries
            .iter()
            .map(|(name, _)| self.match_count(name))
            .collect();

        let best = scores.iter().copied().max().filter(|&s| s > 0)?;

        let mut leaders = self
            .entries
            .iter()
            .zip(&scores)
            .filter(|(_, &score)| score == best)
            .map(|(entry, _)| entry);

        let (reference, reference_rows) = leaders.next()?;
        if leaders.any(|(_, rows)| rows != reference_rows) {
            return None;
        }
        Some(reference.as_str())
    }
}

/// Reconciliation engine
pub struct Reconciler {
    client: Arc<dyn DatabaseClient>,
}

impl Reconciler {
    pub fn new(client: Arc<dyn DatabaseClient>) -> Self {
        Self { client }
    }

    /// Run one reconciliation pass for `table` over `active`.
    ///
    /// Never fails: every problem is logged and reflected in the outcome.
    pub async fn reconcile(&self, table: &str, active: &[ReplicaDescriptor]) -> ReconcileReport {
        let started = Instant::now();
        let outcome = self.run_pass(table, active).await;

        match &outcome {
            ReconcileOutcome::Repaired { reference, repaired, failed } => tracing::info!(
                "Synchronized table '{}' from '{}': {} repaired, {} failed ({:?})",
                table,
                reference,
                repaired.len(),
                failed.len(),
                started.elapsed()
            ),
            ReconcileOutcome::InSync { reference } => {
                tracing::debug!("Table '{}' already consistent with '{}'", table, reference)
            }
            other => tracing::warn!("Synchronization of table '{}' abandoned: {:?}", table, other),
        }

        ReconcileReport {
            table: table.to_string(),
            outcome,
        }
    }

    async fn run_pass(&self, table: &str, active: &[ReplicaDescriptor]) -> ReconcileOutcome {
        if active.is_empty() {
            tracing::warn!("No active databases to synchronize");
            return ReconcileOutcome::NoActiveReplicas;
        }

        let mut columns: Option<Vec<String>> = None;
        let mut statements: Option<TableStatements> = None;
        let mut snapshot = ReconciliationSnapshot::new();

        for replica in active {
            let mut conn = match self.client.connect(&replica.connection_spec).await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Could not connect to '{}' for snapshot: {}", replica.name, e);
                    continue;
                }
            };

            if columns.is_none() {
                match discover_columns(conn.as_mut(), table).await {
                    Ok(found) if !found.is_empty() => {
                        tracing::debug!(
                            "Discovered {} columns of '{}' on '{}'",
                            found.len(),
                            table,
                            replica.name
                        );
                        match TableStatements::new(table, &found) {
                            Ok(s) => statements = Some(s),
                            Err(e) => {
                                close_quietly(conn, &replica.name).await;
                                return ReconcileOutcome::InvalidSchema(e.to_string());
                            }
                        }
                        columns = Some(found);
                    }
                    Ok(_) => {
                        tracing::warn!("Table '{}' does not exist in database '{}'", table, replica.name);
                        close_quietly(conn, &replica.name).await;
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Error reading columns of '{}' from '{}': {}", table, replica.name, e);
                        close_quietly(conn, &replica.name).await;
                        continue;
                    }
                }
            }

            if let Some(stmts) = &statements {
                match conn.execute(&stmts.select_all, &[]).await {
                    Ok(result) => snapshot.insert(replica.name.clone(), result.rows),
                    Err(e) => {
                        tracing::warn!("Error fetching data from database '{}': {}", replica.name, e)
                    }
                }
            }
            close_quietly(conn, &replica.name).await;
        }

        let Some(statements) = statements else {
            return ReconcileOutcome::TableNotFound;
        };
        if snapshot.is_empty() {
            return ReconcileOutcome::NoSnapshots;
        }

        let Some(reference) = snapshot.choose_reference().map(str::to_string) else {
            tracing::error!(
                "Failed to determine the most consistent database for '{}' ({} snapshots)",
                table,
                snapshot.len()
            );
            return ReconcileOutcome::Indeterminate;
        };
        tracing::info!(
            "Database '{}' selected as the source for synchronizing table '{}'",
            reference,
            table
        );

        let reference_rows = snapshot.rows(&reference).unwrap_or_default().to_vec();
        let mut repaired = Vec::new();
        let mut failed = Vec::new();

        for replica in active {
            if replica.name == reference {
                continue;
            }
            if snapshot.rows(&replica.name) == Some(reference_rows.as_slice()) {
                continue;
            }

            match self.repair(replica, &statements, &reference_rows).await {
                Ok(()) => {
                    tracing::info!(
                        "Synchronized database '{}' with data from '{}' for table '{}'",
                        replica.name,
                        reference,
                        table
                    );
                    repaired.push(replica.name.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        "Error synchronizing database '{}' for table '{}': {}",
                        replica.name,
                        table,
                        e
                    );
                    failed.push(replica.name.clone());
                }
            }
        }

        if repaired.is_empty() && failed.is_empty() {
            ReconcileOutcome::InSync { reference }
        } else {
            ReconcileOutcome::Repaired { reference, repaired, failed }
        }
    }

    /// Replace the table contents of `replica` with `rows` in one transaction
    async fn repair(
        &self,
        replica: &ReplicaDescriptor,
        statements: &TableStatements,
        rows: &[Row],
    ) -> Result<()> {
        let mut conn = self.client.connect(&replica.connection_spec).await?;

        let result = async {
            conn.begin().await?;
            conn.execute(&statements.delete_all, &[]).await?;
            for row in rows {
                conn.execute(&statements.upsert, row).await?;
            }
            conn.commit().await
        }
        .await;

        close_quietly(conn, &replica.name).await;
        result
    }
}

async fn discover_columns(conn: &mut dyn Connection, table: &str) -> Result<Vec<String>> {
    let result = conn
        .execute(COLUMNS_QUERY, &[Value::String(table.to_string())])
        .await?;

    Ok(result
        .rows
        .into_iter()
        .filter_map(|row| match row.into_iter().next() {
            Some(Value::String(name)) => Some(name),
            Some(Value::Bytes(raw)) => Some(String::from_utf8_lossy(&raw).into_owned()),
            _ => None,
        })
        .collect())
}

async fn close_quietly(conn: Box<dyn Connection>, replica: &str) {
    if let Err(e) = conn.close().await {
        tracing::debug!("Error closing connection to '{}': {}", replica, e);
    }
}
