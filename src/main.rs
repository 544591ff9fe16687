//! WolfBalance - Health-Aware MariaDB Replica Load Balancer
//!
//! Command line entry point: loads the configuration, wires the health
//! monitor, membership manager and router together, and runs one of the
//! operator commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfbalance::balancer::{Router, StrategyKind};
use wolfbalance::client::{DatabaseClient, MySqlClient};
use wolfbalance::config::WolfBalanceConfig;
use wolfbalance::error::Result;
use wolfbalance::reconcile::Reconciler;
use wolfbalance::state::{HealthMonitor, MembershipManager};

/// WolfBalance - Health-Aware MariaDB Replica Load Balancer
#[derive(Parser)]
#[command(name = "wolfbalance")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfbalance.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Routing strategy (round_robin, random, least_connections)
    #[arg(short, long)]
    strategy: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start health checking and keep the active set up to date
    Run,

    /// Probe every replica once and print its state
    Status,

    /// Reconcile managed tables across the active replicas
    Sync {
        /// Only reconcile this table
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Route a read query to one replica and print the rows
    Query {
        /// SQL to execute
        sql: String,
    },

    /// Apply a write statement to every active replica
    Exec {
        /// SQL to execute
        sql: String,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfbalance.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_init(&output)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_validate(&cli.config)
        }
        command => {
            let config = WolfBalanceConfig::from_file(&cli.config)?;
            let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
            init_logging(level, &config.logging.format);

            let strategy = match &cli.strategy {
                Some(name) => name.parse::<StrategyKind>()?,
                None => config.balancer.strategy,
            };
            let balancer = Balancer::build(&config, strategy).await?;

            match command {
                Commands::Run => run_balancer(&config, balancer).await,
                Commands::Status => run_status(balancer).await,
                Commands::Sync { table } => run_sync(balancer, table).await,
                Commands::Query { sql } => run_query(balancer, &sql).await,
                Commands::Exec { sql } => run_exec(balancer, &sql).await,
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wired components shared by the runtime commands
struct Balancer {
    monitor: Arc<HealthMonitor>,
    membership: Arc<MembershipManager>,
    router: Router,
}

impl Balancer {
    async fn build(config: &WolfBalanceConfig, strategy: StrategyKind) -> Result<Self> {
        let replicas = config.replica_descriptors()?;
        tracing::info!("Loaded {} database(s) from configuration", replicas.len());

        let client: Arc<dyn DatabaseClient> = Arc::new(MySqlClient::new());
        let reconciler = Reconciler::new(Arc::clone(&client));
        let membership = Arc::new(MembershipManager::new(
            replicas.clone(),
            reconciler,
            config.balancer.tables.clone(),
        ));

        let monitor = Arc::new(HealthMonitor::new(replicas, Arc::clone(&client)));
        monitor.add_observer(membership.clone()).await;

        let router = Router::new(Arc::clone(&membership), client, strategy)
            .with_monitor(Arc::clone(&monitor));

        // First cycle settles the active set before anything is routed
        monitor.probe_once().await;

        Ok(Self {
            monitor,
            membership,
            router,
        })
    }
}

async fn run_balancer(config: &WolfBalanceConfig, balancer: Balancer) -> Result<()> {
    tracing::info!("Starting WolfBalance");

    for report in balancer.membership.reconcile_all().await {
        tracing::info!("Initial reconciliation of {}: {:?}", report.table, report.outcome);
    }

    let handle = balancer.monitor.run(config.health_check_interval());
    tracing::info!(
        "Health checks running every {}s. Press Ctrl+C to stop",
        config.balancer.health_check_interval_secs
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    balancer.monitor.stop();
    if let Err(e) = handle.await {
        tracing::error!("Health check task failed: {}", e);
    }

    let stats = balancer.router.stats().await;
    tracing::info!("Routed {} connection(s) before shutdown", stats.total_routed);
    Ok(())
}

async fn run_status(balancer: Balancer) -> Result<()> {
    let states = balancer.monitor.states().await;
    let summary = balancer.membership.summary().await;
    let stats = balancer.router.stats().await;

    let status = serde_json::json!({
        "replicas": states
            .into_iter()
            .map(|(name, state)| serde_json::json!({ "name": name, "state": state }))
            .collect::<Vec<_>>(),
        "membership": summary,
        "router": stats,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn run_sync(balancer: Balancer, table: Option<String>) -> Result<()> {
    let reports = match table {
        Some(table) => vec![balancer.membership.reconcile_table(&table).await],
        None => balancer.membership.reconcile_all().await,
    };
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

async fn run_query(balancer: Balancer, sql: &str) -> Result<()> {
    match balancer.router.execute_select(sql, &[]).await {
        Some(rows) => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(())
        }
        None => Err(wolfbalance::Error::QueryExecution(
            "no active database could serve the query".into(),
        )),
    }
}

async fn run_exec(balancer: Balancer, sql: &str) -> Result<()> {
    let report = balancer.router.execute_write(sql, &[]).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.is_unavailable() {
        return Err(wolfbalance::Error::QueryExecution(
            "no active database available for write".into(),
        ));
    }
    if !report.is_complete() {
        eprintln!("Write failed on {} database(s)", report.failed.len());
    }
    Ok(())
}

fn run_init(output: &Path) -> Result<()> {
    let config = r#"# WolfBalance Configuration

[balancer]
# round_robin | random | least_connections
strategy = "round_robin"
# Tables reconciled when a database rejoins
tables = ["users"]
health_check_interval_secs = 15

[[replicas]]
name = "db-1"
connection_string = "host=10.0.0.1;port=3306;user=app;password=changeme;database=app"

[[replicas]]
name = "db-2"
connection_string = "host=10.0.0.2;port=3306;user=app;password=changeme;database=app"

[[replicas]]
name = "db-3"
connection_string = "host=10.0.0.3;port=3306;user=app;password=changeme;database=app"

# Alternatively load replicas from a JSON list of {"Name", "ConnectionString"}
# replicas_file = "db.json"

[logging]
level = "info"
# pretty | json
format = "pretty"
"#;

    std::fs::write(output, config)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to list your databases and managed tables.");
    println!("Then start with: wolfbalance --config {} run", output.display());

    Ok(())
}

fn run_validate(config_path: &Path) -> Result<()> {
    match WolfBalanceConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Strategy: {}", config.balancer.strategy);
            println!("  Tables: {}", config.balancer.tables.join(", "));
            println!("  Health check: every {}s", config.balancer.health_check_interval_secs);
            println!("  Databases: {}", config.replicas.len());
            for replica in config.replica_descriptors()? {
                println!("    {} ({})", replica.name, replica.connection_spec);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
