//! Replica selection strategies.

use std::collections::HashMap;
use std::str::FromStr;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::replica::ReplicaDescriptor;

/// Strategy names accepted in configuration and on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RoundRobin,
    Random,
    LeastConnections,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::RoundRobin => "round_robin",
            StrategyKind::Random => "random",
            StrategyKind::LeastConnections => "least_connections",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(StrategyKind::RoundRobin),
            "random" => Ok(StrategyKind::Random),
            "least_connections" => Ok(StrategyKind::LeastConnections),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

/// Cursor-based rotation over the active set.
///
/// The cursor is an index, not a replica identity: when the active set
/// shrinks or grows it is taken modulo the new length, so a rotation may
/// skip or repeat a replica right after membership churn.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: usize,
}

impl RoundRobin {
    fn select<'a>(&mut self, active: &'a [ReplicaDescriptor]) -> Option<&'a ReplicaDescriptor> {
        if active.is_empty() {
            return None;
        }
        let index = self.cursor % active.len();
        self.cursor = (index + 1) % active.len();
        active.get(index)
    }
}

/// Picks the active replica with the fewest outstanding selections.
///
/// Counts are a load proxy maintained by callers through `release`;
/// forgetting to release makes a replica look permanently busier.
#[derive(Debug, Default)]
pub struct LeastConnections {
    connections: HashMap<String, usize>,
}

impl LeastConnections {
    fn select<'a>(&mut self, active: &'a [ReplicaDescriptor]) -> Option<&'a ReplicaDescriptor> {
        // min_by_key returns the first minimum, which is the active-order tie break
        let selected = active.iter().min_by_key(|replica| self.count(&replica.name))?;

        *self.connections.entry(selected.name.clone()).or_insert(0) += 1;
        Some(selected)
    }

    fn release(&mut self, name: &str) {
        if let Some(count) = self.connections.get_mut(name) {
            *count = count.saturating_sub(1);
        }
    }

    /// Current count for a replica; unseen replicas count as zero
    pub fn count(&self, name: &str) -> usize {
        self.connections.get(name).copied().unwrap_or(0)
    }
}

/// Selection policy over the active set
#[derive(Debug)]
pub enum Strategy {
    RoundRobin(RoundRobin),
    Random,
    LeastConnections(LeastConnections),
}

impl Strategy {
    /// Build a fresh strategy of the given kind
    pub fn new(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::RoundRobin => Strategy::RoundRobin(RoundRobin::default()),
            StrategyKind::Random => Strategy::Random,
            StrategyKind::LeastConnections => Strategy::LeastConnections(LeastConnections::default()),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::RoundRobin(_) => StrategyKind::RoundRobin,
            Strategy::Random => StrategyKind::Random,
            Strategy::LeastConnections(_) => StrategyKind::LeastConnections,
        }
    }

    /// Pick a replica from `active`; `None` only when `active` is empty
    pub fn select<'a>(&mut self, active: &'a [ReplicaDescriptor]) -> Option<&'a ReplicaDescriptor> {
        match self {
            Strategy::RoundRobin(rr) => rr.select(active),
            Strategy::Random => active.choose(&mut rand::thread_rng()),
            Strategy::LeastConnections(lc) => lc.select(active),
        }
    }

    /// Report that an operation on `name` finished
    pub fn release(&mut self, name: &str) {
        if let Strategy::LeastConnections(lc) = self {
            lc.release(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replicas(names: &[&str]) -> Vec<ReplicaDescriptor> {
        names
            .iter()
            .map(|n| ReplicaDescriptor::parse(*n, &format!("host={}", n)).unwrap())
            .collect()
    }

    fn pick(strategy: &mut Strategy, active: &[ReplicaDescriptor]) -> String {
        strategy.select(active).unwrap().name.clone()
    }

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!("round_robin".parse::<StrategyKind>().unwrap(), StrategyKind::RoundRobin);
        assert_eq!("least_connections".parse::<StrategyKind>().unwrap(), StrategyKind::LeastConnections);
        assert!(matches!(
            "weighted".parse::<StrategyKind>(),
            Err(Error::UnknownStrategy(name)) if name == "weighted"
        ));
    }

    #[test]
    fn test_empty_active_set() {
        for kind in [StrategyKind::RoundRobin, StrategyKind::Random, StrategyKind::LeastConnections] {
            assert!(Strategy::new(kind).select(&[]).is_none());
        }
    }

    #[test]
    fn test_round_robin_cycle() {
        let active = replicas(&["db-1", "db-2", "db-3"]);
        let mut strategy = Strategy::new(StrategyKind::RoundRobin);

        let picks: Vec<String> = (0..4).map(|_| pick(&mut strategy, &active)).collect();
        assert_eq!(picks, vec!["db-1", "db-2", "db-3", "db-1"]);
    }

    #[test]
    fn test_round_robin_after_shrink() {
        let active = replicas(&["db-1", "db-2", "db-3"]);
        let mut strategy = Strategy::new(StrategyKind::RoundRobin);
        pick(&mut strategy, &active);
        pick(&mut strategy, &active);

        // cursor is 2; the shrunken set wraps it to index 0
        let shrunk = replicas(&["db-1", "db-3"]);
        assert_eq!(pick(&mut strategy, &shrunk), "db-1");
        assert_eq!(pick(&mut strategy, &shrunk), "db-3");
    }

    #[test]
    fn test_random_stays_in_active_set() {
        let active = replicas(&["db-1", "db-2"]);
        let mut strategy = Strategy::new(StrategyKind::Random);
        for _ in 0..50 {
            let name = pick(&mut strategy, &active);
            assert!(name == "db-1" || name == "db-2");
        }
    }

    #[test]
    fn test_least_connections_tie_break_and_release() {
        let active = replicas(&["db-1", "db-2"]);
        let mut strategy = Strategy::new(StrategyKind::LeastConnections);

        assert_eq!(pick(&mut strategy, &active), "db-1");
        assert_eq!(pick(&mut strategy, &active), "db-2");
        // both at 1: first in active order wins
        assert_eq!(pick(&mut strategy, &active), "db-1");

        strategy.release("db-1");
        strategy.release("db-1");
        strategy.release("db-1");
        strategy.release("never-seen");
        if let Strategy::LeastConnections(lc) = &strategy {
            assert_eq!(lc.count("db-1"), 0);
            assert_eq!(lc.count("db-2"), 1);
            assert_eq!(lc.count("never-seen"), 0);
        }
        assert_eq!(pick(&mut strategy, &active), "db-1");
    }

    #[test]
    fn test_least_connections_new_replica_starts_at_zero() {
        let mut strategy = Strategy::new(StrategyKind::LeastConnections);
        let first = replicas(&["db-1", "db-2"]);
        for _ in 0..4 {
            pick(&mut strategy, &first);
        }

        let grown = replicas(&["db-1", "db-2", "db-3"]);
        assert_eq!(pick(&mut strategy, &grown), "db-3");
    }

    #[test]
    fn test_least_connections_ignores_inactive_history() {
        let mut strategy = Strategy::new(StrategyKind::LeastConnections);
        let all = replicas(&["db-1", "db-2"]);
        pick(&mut strategy, &all);

        // db-1 is busier but db-2 is gone: only active replicas are considered
        let only_one = replicas(&["db-1"]);
        assert_eq!(pick(&mut strategy, &only_one), "db-1");
    }
}
