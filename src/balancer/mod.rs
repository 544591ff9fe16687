//! Load Balancer Module
//!
//! Replica selection strategies and the router that applies them to
//! the active set.

mod router;
mod strategy;

pub use router::{RoutedConnection, Router, RouterStats, WriteReport};
pub use strategy::{LeastConnections, RoundRobin, Strategy, StrategyKind};
