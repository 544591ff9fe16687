//! Reconciliation Module
//!
//! Detects diverging table contents across the active replicas and
//! repairs them from the replica the majority agrees with.

mod engine;
pub mod sql;

pub use engine::{Reconciler, ReconcileOutcome, ReconcileReport, ReconciliationSnapshot};
