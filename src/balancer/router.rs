//! Load Balancer Routing Module
//!
//! Hands out a connection to one active replica per read and fans writes
//! out to the whole active set.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use super::strategy::{Strategy, StrategyKind};
use crate::client::{Connection, DatabaseClient, RowSet, Value};
use crate::error::{Error, Result};
use crate::replica::{HealthState, ReplicaDescriptor};
use crate::state::{HealthMonitor, HealthObserver, MembershipManager};

/// A connection handed out by `Router::route`
pub struct RoutedConnection {
    pub connection: Box<dyn Connection>,
    /// Replica the connection points at; pass it to `Router::release`
    pub replica: String,
}

/// Per-replica results of a statement fanned out to the active set
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteReport {
    /// Replicas that committed, with rows affected
    pub applied: Vec<(String, u64)>,
    /// Replicas that failed, with the error
    pub failed: Vec<(String, String)>,
}

impl WriteReport {
    /// No replica was available to take the write
    pub fn is_unavailable(&self) -> bool {
        self.applied.is_empty() && self.failed.is_empty()
    }

    /// Every targeted replica applied the write
    pub fn is_complete(&self) -> bool {
        !self.applied.is_empty() && self.failed.is_empty()
    }
}

/// Router statistics
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub strategy: StrategyKind,
    pub active_replicas: Vec<String>,
    /// Successful routes since start
    pub total_routed: usize,
}

/// Load balancer router over the membership's active set
pub struct Router {
    membership: Arc<MembershipManager>,
    client: Arc<dyn DatabaseClient>,
    strategy: Mutex<Strategy>,
    /// Told about failures seen while routing, if attached
    monitor: Option<Arc<HealthMonitor>>,
    routed: AtomicUsize,
}

impl Router {
    pub fn new(
        membership: Arc<MembershipManager>,
        client: Arc<dyn DatabaseClient>,
        strategy: StrategyKind,
    ) -> Self {
        tracing::info!("Initializing load balancer with strategy: {}", strategy);
        Self {
            membership,
            client,
            strategy: Mutex::new(Strategy::new(strategy)),
            monitor: None,
            routed: AtomicUsize::new(0),
        }
    }

    /// Attach the health monitor so routing failures are re-checked by it
    pub fn with_monitor(mut self, monitor: Arc<HealthMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub async fn strategy_kind(&self) -> StrategyKind {
        self.strategy.lock().await.kind()
    }

    /// Replace the strategy; the new one starts with fresh state
    pub async fn set_strategy(&self, kind: StrategyKind) {
        *self.strategy.lock().await = Strategy::new(kind);
        tracing::info!("Strategy changed to: {}", kind);
    }

    /// Select an active replica and connect to it.
    ///
    /// Returns `None` when no replica is active or the selected one refused
    /// the connection; in the latter case it is reported unhealthy and the
    /// caller may retry.
    pub async fn route(&self) -> Option<RoutedConnection> {
        let active = self.membership.active_set().await;
        if active.is_empty() {
            tracing::error!("No active databases available");
            return None;
        }

        let replica = {
            let mut strategy = self.strategy.lock().await;
            strategy.select(&active)?.clone()
        };
        tracing::debug!("Selected database: {}", replica.name);

        match self.client.connect(&replica.connection_spec).await {
            Ok(connection) => {
                self.routed.fetch_add(1, Ordering::Relaxed);
                Some(RoutedConnection {
                    connection,
                    replica: replica.name,
                })
            }
            Err(e) => {
                tracing::error!("Failed to connect to {}: {}", replica.name, e);
                self.release(&replica.name).await;
                self.report_failure(&replica.name).await;
                None
            }
        }
    }

    /// Report that an operation on a routed replica finished
    pub async fn release(&self, replica: &str) {
        self.strategy.lock().await.release(replica);
    }

    async fn report_failure(&self, replica: &str) {
        self.membership
            .on_status_change(replica, HealthState::Unhealthy)
            .await;
        if let Some(monitor) = &self.monitor {
            monitor.suspect(replica).await;
        }
    }

    /// Run a read on one routed replica
    pub async fn execute_select(&self, sql: &str, params: &[Value]) -> Option<RowSet> {
        let RoutedConnection { mut connection, replica } = self.route().await?;

        let result = connection.execute(sql, params).await;
        if let Err(e) = connection.close().await {
            tracing::debug!("Error closing connection to {}: {}", replica, e);
        }
        self.release(&replica).await;

        match result {
            Ok(rows) => Some(rows),
            Err(e) => {
                tracing::error!("Error executing SELECT on {}: {}", replica, e);
                if e.is_connectivity() {
                    self.report_failure(&replica).await;
                }
                None
            }
        }
    }

    /// Apply a data-modifying statement on every active replica
    pub async fn execute_write(&self, sql: &str, params: &[Value]) -> WriteReport {
        self.fan_out(sql, params).await
    }

    /// Create a table on every active replica
    pub async fn create_table(&self, ddl: &str) -> WriteReport {
        self.fan_out(ddl, &[]).await
    }

    async fn fan_out(&self, sql: &str, params: &[Value]) -> WriteReport {
        let active = self.membership.active_set().await;
        let mut report = WriteReport::default();

        if active.is_empty() {
            tracing::error!("No active databases available for write");
            return report;
        }

        for replica in &active {
            match self.apply(replica, sql, params).await {
                Ok(rows_affected) => {
                    tracing::info!("Query executed on active database {}", replica.name);
                    report.applied.push((replica.name.clone(), rows_affected));
                }
                Err(e) => {
                    tracing::error!("Error executing query on database {}: {}", replica.name, e);
                    if e.is_connectivity() {
                        self.report_failure(&replica.name).await;
                    }
                    report.failed.push((replica.name.clone(), e.to_string()));
                }
            }
        }

        report
    }

    async fn apply(&self, replica: &ReplicaDescriptor, sql: &str, params: &[Value]) -> Result<u64> {
        let mut conn = self.client.connect(&replica.connection_spec).await?;

        let result = async {
            conn.begin().await?;
            let rows = conn.execute(sql, params).await?;
            conn.commit().await?;
            Ok::<_, Error>(rows.rows_affected)
        }
        .await;

        if let Err(e) = conn.close().await {
            tracing::debug!("Error closing connection to {}: {}", replica.name, e);
        }
        result
    }

    /// Get stats about the router state
    pub async fn stats(&self) -> RouterStats {
        RouterStats {
            strategy: self.strategy_kind().await,
            active_replicas: self
                .membership
                .active_set()
                .await
                .into_iter()
                .map(|r| r.name)
                .collect(),
            total_routed: self.routed.load(Ordering::Relaxed),
        }
    }
}
