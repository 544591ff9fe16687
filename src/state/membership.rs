//! Replica Membership Management
//!
//! Tracks which configured replicas are eligible for routing and keeps a
//! returning replica out of rotation until its data has been reconciled.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use super::health::HealthObserver;
use crate::reconcile::{ReconcileOutcome, ReconcileReport, Reconciler};
use crate::replica::{HealthState, ReplicaDescriptor};

/// Membership manager for the active set
pub struct MembershipManager {
    /// Full configured replica list, in configuration order
    configured: Vec<ReplicaDescriptor>,
    /// Replicas currently eligible for routing
    active: RwLock<Vec<ReplicaDescriptor>>,
    /// Serializes health transitions and reconciliation passes
    transitions: Mutex<()>,
    reconciler: Reconciler,
    /// Tables reconciled when a replica rejoins
    tables: Vec<String>,
}

impl MembershipManager {
    /// Create a manager; every configured replica starts active
    pub fn new(configured: Vec<ReplicaDescriptor>, reconciler: Reconciler, tables: Vec<String>) -> Self {
        Self {
            active: RwLock::new(configured.clone()),
            configured,
            transitions: Mutex::new(()),
            reconciler,
            tables,
        }
    }

    /// Snapshot of the active set
    pub async fn active_set(&self) -> Vec<ReplicaDescriptor> {
        self.active.read().await.clone()
    }

    pub async fn is_active(&self, name: &str) -> bool {
        self.active.read().await.iter().any(|r| r.name == name)
    }

    /// Reconcile every managed table over the current active set
    pub async fn reconcile_all(&self) -> Vec<ReconcileReport> {
        let _transition = self.transitions.lock().await;
        let active = self.active_set().await;
        self.reconcile_tables(&active).await
    }

    /// Reconcile one table over the current active set
    pub async fn reconcile_table(&self, table: &str) -> ReconcileReport {
        let _transition = self.transitions.lock().await;
        let active = self.active_set().await;
        self.reconciler.reconcile(table, &active).await
    }

    async fn reconcile_tables(&self, replicas: &[ReplicaDescriptor]) -> Vec<ReconcileReport> {
        let mut reports = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            reports.push(self.reconciler.reconcile(table, replicas).await);
        }
        reports
    }

    async fn deactivate(&self, name: &str) {
        let _transition = self.transitions.lock().await;
        let mut active = self.active.write().await;
        let before = active.len();
        active.retain(|r| r.name != name);

        if active.len() < before {
            tracing::warn!(
                "Database {} marked as unhealthy. Excluding from load balancing ({} active)",
                name,
                active.len()
            );
        }
    }

    async fn activate(&self, name: &str) {
        let _transition = self.transitions.lock().await;

        if self.is_active(name).await {
            return;
        }

        let Some(replica) = self.configured.iter().find(|r| r.name == name).cloned() else {
            tracing::warn!("Ignoring health notification for unconfigured database {}", name);
            return;
        };

        tracing::info!("Database {} marked as healthy. Reconciling before including it", name);

        // The rejoining replica takes part in the pass but is published only afterwards
        let mut candidates = self.active_set().await;
        candidates.push(replica.clone());
        let reports = self.reconcile_tables(&candidates).await;

        let stale = unreconciled_tables(&reports, name);
        if !stale.is_empty() {
            tracing::warn!(
                "Database {} rejoining with {} of {} tables not reconciled: {}",
                name,
                stale.len(),
                reports.len(),
                stale.join(", ")
            );
        }

        let mut active = self.active.write().await;
        if !active.iter().any(|r| r.name == name) {
            active.push(replica);
        }
        tracing::info!("Database {} included in load balancing ({} active)", name, active.len());
    }

    /// Membership counts for status output
    pub async fn summary(&self) -> MembershipSummary {
        let active = self.active.read().await;
        let active_names: Vec<String> = active.iter().map(|r| r.name.clone()).collect();
        let inactive_names = self
            .configured
            .iter()
            .filter(|r| !active_names.contains(&r.name))
            .map(|r| r.name.clone())
            .collect();

        MembershipSummary {
            configured: self.configured.len(),
            active: active_names,
            inactive: inactive_names,
        }
    }
}

/// Tables whose pass did not leave `replica` matching a reference
fn unreconciled_tables<'a>(reports: &'a [ReconcileReport], replica: &str) -> Vec<&'a str> {
    reports
        .iter()
        .filter(|report| match &report.outcome {
            ReconcileOutcome::InSync { .. } => false,
            ReconcileOutcome::Repaired { failed, .. } => failed.iter().any(|f| f == replica),
            _ => true,
        })
        .map(|report| report.table.as_str())
        .collect()
}

#[async_trait]
impl HealthObserver for MembershipManager {
    async fn on_status_change(&self, replica: &str, state: HealthState) {
        match state {
            HealthState::Unhealthy => self.deactivate(replica).await,
            HealthState::Healthy => self.activate(replica).await,
            HealthState::Unknown => {}
        }
    }

    fn observer_name(&self) -> &str {
        "MembershipManager"
    }
}

/// Membership summary information
#[derive(Debug, Clone, Serialize)]
pub struct MembershipSummary {
    pub configured: usize,
    pub active: Vec<String>,
    pub inactive: Vec<String>,
}
