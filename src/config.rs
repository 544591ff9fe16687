//! WolfBalance Configuration
//!
//! This module provides configuration structures for the replica
//! load balancer, loaded once at startup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::balancer::StrategyKind;
use crate::reconcile::sql::quote_ident;
use crate::replica::ReplicaDescriptor;

/// Main WolfBalance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfBalanceConfig {
    /// Routing and reconciliation settings
    #[serde(default)]
    pub balancer: BalancerConfig,

    /// Replica pool, in routing order
    #[serde(default)]
    pub replicas: Vec<ReplicaConfig>,

    /// JSON file with additional replicas (`[{"Name": .., "ConnectionString": ..}]`)
    #[serde(default)]
    pub replicas_file: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Routing and reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Replica selection strategy
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,

    /// Tables reconciled when a replica rejoins
    #[serde(default = "default_tables")]
    pub tables: Vec<String>,

    /// Seconds between health check cycles
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

/// One replica entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Unique replica name
    #[serde(alias = "Name")]
    pub name: String,

    /// `key=value;key=value` connection string
    #[serde(alias = "ConnectionString")]
    pub connection_string: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_strategy() -> StrategyKind {
    StrategyKind::RoundRobin
}

fn default_tables() -> Vec<String> {
    vec!["users".to_string()]
}

fn default_health_check_interval_secs() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            tables: default_tables(),
            health_check_interval_secs: default_health_check_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfBalanceConfig {
    /// Load configuration from a TOML file.
    ///
    /// A relative `replicas_file` is resolved against the config file's directory.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&content, base)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        Self::parse(content, Path::new("."))
    }

    fn parse(content: &str, base: &Path) -> crate::Result<Self> {
        let mut config: WolfBalanceConfig = toml::from_str(content)?;

        if let Some(file) = &config.replicas_file {
            let path = if file.is_relative() { base.join(file) } else { file.clone() };
            let extra = load_replica_file(&path)?;
            config.replicas.extend(extra);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.replicas.is_empty() {
            return Err(crate::Error::Config("no replicas configured".into()));
        }

        let mut names = HashSet::new();
        for replica in &self.replicas {
            if replica.name.trim().is_empty() {
                return Err(crate::Error::Config("replica name cannot be empty".into()));
            }
            if !names.insert(replica.name.as_str()) {
                return Err(crate::Error::Config(format!("duplicate replica name: {}", replica.name)));
            }
            ReplicaDescriptor::parse(&replica.name, &replica.connection_string)?;
        }

        if self.balancer.tables.is_empty() {
            return Err(crate::Error::Config("balancer.tables cannot be empty".into()));
        }
        for table in &self.balancer.tables {
            quote_ident(table).map_err(|e| crate::Error::Config(e.to_string()))?;
        }

        if self.balancer.health_check_interval_secs == 0 {
            return Err(crate::Error::Config(
                "balancer.health_check_interval_secs must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Parsed replica descriptors, in configuration order
    pub fn replica_descriptors(&self) -> crate::Result<Vec<ReplicaDescriptor>> {
        self.replicas
            .iter()
            .map(|r| ReplicaDescriptor::parse(&r.name, &r.connection_string))
            .collect()
    }

    /// Get health check interval as Duration
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.balancer.health_check_interval_secs)
    }
}

/// Load a JSON replica list
pub fn load_replica_file(path: &Path) -> crate::Result<Vec<ReplicaConfig>> {
    tracing::info!("Loading database configuration from {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let replicas: Vec<ReplicaConfig> = serde_json::from_str(&content)?;
    if replicas.is_empty() {
        return Err(crate::Error::Config(format!(
            "replica file {} is empty",
            path.display()
        )));
    }
    Ok(replicas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[balancer]
strategy = "least_connections"
tables = ["users", "orders"]
health_check_interval_secs = 5

[[replicas]]
name = "db-1"
connection_string = "host=10.0.0.1;port=3306;user=app;password=secret;database=shop"

[[replicas]]
name = "db-2"
connection_string = "host=10.0.0.2;port=3306;user=app;password=secret;database=shop"
"#;

        let config = WolfBalanceConfig::from_str(toml).unwrap();
        assert_eq!(config.balancer.strategy, StrategyKind::LeastConnections);
        assert_eq!(config.health_check_interval(), Duration::from_secs(5));
        assert_eq!(config.logging.level, "info");

        let replicas = config.replica_descriptors().unwrap();
        assert_eq!(replicas.len(), 2);
        assert_eq!(replicas[1].connection_spec.get("host"), Some("10.0.0.2"));
    }

    #[test]
    fn test_defaults() {
        let toml = r#"
[[replicas]]
name = "db-1"
connection_string = "host=localhost"
"#;
        let config = WolfBalanceConfig::from_str(toml).unwrap();
        assert_eq!(config.balancer.strategy, StrategyKind::RoundRobin);
        assert_eq!(config.balancer.tables, vec!["users"]);
        assert_eq!(config.balancer.health_check_interval_secs, 15);
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(matches!(
            WolfBalanceConfig::from_str("[balancer]\nstrategy = \"random\"\n"),
            Err(crate::Error::Config(_))
        ));

        let duplicate = r#"
[[replicas]]
name = "db-1"
connection_string = "host=a"
[[replicas]]
name = "db-1"
connection_string = "host=b"
"#;
        assert!(matches!(WolfBalanceConfig::from_str(duplicate), Err(crate::Error::Config(_))));

        let malformed = r#"
[[replicas]]
name = "db-1"
connection_string = "host=a;port"
"#;
        assert!(matches!(
            WolfBalanceConfig::from_str(malformed),
            Err(crate::Error::ConnectionSpec(_))
        ));

        let bad_strategy = r#"
[balancer]
strategy = "weighted"
[[replicas]]
name = "db-1"
connection_string = "host=a"
"#;
        assert!(matches!(
            WolfBalanceConfig::from_str(bad_strategy),
            Err(crate::Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_replicas_file() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("db.json");
        let mut file = std::fs::File::create(&json_path).unwrap();
        write!(
            file,
            r#"[
                {{"Name": "db-1", "ConnectionString": "Host=localhost;Port=5432;User=app"}},
                {{"Name": "db-2", "ConnectionString": "Host=localhost;Port=5433;User=app"}}
            ]"#
        )
        .unwrap();

        let config_path = dir.path().join("wolfbalance.toml");
        std::fs::write(&config_path, "replicas_file = \"db.json\"\n").unwrap();

        let config = WolfBalanceConfig::from_file(&config_path).unwrap();
        let names: Vec<_> = config.replicas.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["db-1", "db-2"]);
    }

    #[test]
    fn test_missing_or_empty_replicas_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_replica_file(&dir.path().join("missing.json")),
            Err(crate::Error::Io(_))
        ));

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "[]").unwrap();
        assert!(matches!(load_replica_file(&empty), Err(crate::Error::Config(_))));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{not json").unwrap();
        assert!(matches!(load_replica_file(&broken), Err(crate::Error::Json(_))));
    }
}
