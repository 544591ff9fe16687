//! State Management Module
//!
//! Replica health tracking and the membership of the active set.

pub mod health;
mod membership;

pub use health::{HealthMonitor, HealthObserver, HealthTransition, ObserverId};
pub use membership::{MembershipManager, MembershipSummary};
