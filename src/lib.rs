//! WolfBalance - Health-Aware MariaDB Replica Load Balancer
//!
//! Routes reads and writes across a pool of independent MariaDB replicas,
//! keeps a live view of which replicas are reachable, and reconciles
//! diverging table contents toward the dataset most replicas agree on.
//!
//! # Architecture
//!
//! A health monitor probes every replica on a fixed interval and notifies
//! the membership manager of transitions. The membership manager owns the
//! active set and reconciles a returning replica before it becomes
//! routable again. The router selects a replica from the active set with
//! a pluggable strategy.
//!
//! This is not a consensus protocol: reconciliation is a best-effort
//! majority heuristic, not a correctness guarantee under concurrent writes.
//!
//! # Features
//!
//! - Round-robin, random and least-connections selection
//! - Periodic, non-overlapping health checks with observer notifications
//! - Reconciliation-before-activation for rejoining replicas
//! - Write fan-out with per-replica failure reporting

pub mod config;
pub mod error;
pub mod replica;
pub mod client;
pub mod balancer;
pub mod state;
pub mod reconcile;

pub use config::WolfBalanceConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfBalanceConfig;
    pub use crate::error::{Error, Result};
    pub use crate::replica::{ConnectionSpec, HealthState, ReplicaDescriptor};
    pub use crate::client::{Connection, DatabaseClient, MySqlClient, RowSet, Value};
    pub use crate::balancer::{Router, StrategyKind};
    pub use crate::state::{HealthMonitor, HealthObserver, MembershipManager};
    pub use crate::reconcile::{Reconciler, ReconcileOutcome};
}
