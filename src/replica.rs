//! Replica descriptors, connection specs and health classification.

use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Keys whose values are never printed
const SECRET_KEYS: &[&str] = &["password", "pwd"];

/// Parsed `key=value;key=value` connection string
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionSpec {
    /// Pairs in the order they appeared, keys lower-cased
    pairs: Vec<(String, String)>,
}

impl ConnectionSpec {
    /// Parse a semicolon-separated connection string.
    ///
    /// Empty segments are skipped. Every other segment must contain exactly
    /// one `=`; keys are trimmed and lower-cased, values are trimmed.
    pub fn parse(input: &str) -> Result<Self> {
        let mut pairs = Vec::new();

        for segment in input.split(';') {
            if segment.trim().is_empty() {
                continue;
            }

            let mut parts = segment.split('=');
            let (key, value) = match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => (key, value),
                _ => return Err(Error::ConnectionSpec(segment.trim().to_string())),
            };

            pairs.push((key.trim().to_lowercase(), value.trim().to_string()));
        }

        Ok(Self { pairs })
    }

    /// Look up a value by (lower-case) key; the last occurrence wins
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First value present among several alias keys
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl FromStr for ConnectionSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ConnectionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .pairs
            .iter()
            .map(|(k, v)| {
                if SECRET_KEYS.contains(&k.as_str()) {
                    format!("{}=****", k)
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect();
        write!(f, "{}", parts.join(";"))
    }
}

/// One configured database replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaDescriptor {
    /// Unique, stable replica name
    pub name: String,
    /// Parsed connection parameters
    pub connection_spec: ConnectionSpec,
}

impl ReplicaDescriptor {
    pub fn new(name: impl Into<String>, connection_spec: ConnectionSpec) -> Self {
        Self {
            name: name.into(),
            connection_spec,
        }
    }

    /// Build a descriptor from a raw connection string
    pub fn parse(name: impl Into<String>, connection_string: &str) -> Result<Self> {
        Ok(Self::new(name, ConnectionSpec::parse(connection_string)?))
    }
}

/// Reachability classification of a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Not probed yet
    Unknown,
    /// Last probe connected successfully
    Healthy,
    /// Last probe failed to connect
    Unhealthy,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Unknown => write!(f, "UNKNOWN"),
            HealthState::Healthy => write!(f, "HEALTHY"),
            HealthState::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}
