//! Replica Health Monitor
//!
//! Periodically probes every configured replica and notifies registered
//! observers when a replica's classification changes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::DatabaseClient;
use crate::replica::{HealthState, ReplicaDescriptor};

/// Handle returned by `add_observer`, used to unregister
pub type ObserverId = u64;

/// Subscriber contract for health transitions
#[async_trait]
pub trait HealthObserver: Send + Sync {
    /// Called once per transition, in probe order; the monitor waits for
    /// the call to finish before probing the next replica
    async fn on_status_change(&self, replica: &str, state: HealthState);

    /// Name used in log lines
    fn observer_name(&self) -> &str {
        "observer"
    }
}

/// One emitted transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthTransition {
    pub replica: String,
    pub previous: HealthState,
    pub current: HealthState,
}

/// Health monitor for the configured replica list
pub struct HealthMonitor {
    /// Replicas in probe order
    replicas: Vec<ReplicaDescriptor>,
    client: Arc<dyn DatabaseClient>,
    /// Last classification per replica; written only by `probe_once`
    states: RwLock<HashMap<String, HealthState>>,
    /// Replicas whose stored state is disregarded at their next probe
    suspects: Mutex<HashSet<String>>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn HealthObserver>)>>,
    next_observer_id: AtomicU64,
    /// Serializes probe cycles
    cycle: Mutex<()>,
    shutdown: CancellationToken,
}

impl HealthMonitor {
    /// Create a monitor; every replica starts as `Unknown`
    pub fn new(replicas: Vec<ReplicaDescriptor>, client: Arc<dyn DatabaseClient>) -> Self {
        let states = replicas
            .iter()
            .map(|r| (r.name.clone(), HealthState::Unknown))
            .collect();

        Self {
            replicas,
            client,
            states: RwLock::new(states),
            suspects: Mutex::new(HashSet::new()),
            observers: RwLock::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
            cycle: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register an observer
    pub async fn add_observer(&self, observer: Arc<dyn HealthObserver>) -> ObserverId {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Observer {} added", observer.observer_name());
        self.observers.write().await.push((id, observer));
        id
    }

    /// Unregister an observer; returns false if it was not registered
    pub async fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().await;
        match observers.iter().position(|(existing, _)| *existing == id) {
            Some(pos) => {
                let (_, observer) = observers.remove(pos);
                tracing::info!("Observer {} removed", observer.observer_name());
                true
            }
            None => false,
        }
    }

    /// Deliver a transition to every observer, one after another
    pub async fn notify(&self, replica: &str, state: HealthState) {
        // Snapshot so observers may (un)register while being notified
        let observers: Vec<Arc<dyn HealthObserver>> = self
            .observers
            .read()
            .await
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        for observer in observers {
            observer.on_status_change(replica, state).await;
        }
    }

    /// Probe every replica once, emitting changes as they are found
    pub async fn probe_once(&self) -> Vec<HealthTransition> {
        let _cycle = self.cycle.lock().await;
        let mut transitions = Vec::new();

        for replica in &self.replicas {
            let current = self.probe(replica).await;
            let forced = self.suspects.lock().await.remove(&replica.name);

            let previous = {
                let mut states = self.states.write().await;
                let previous = states.get(&replica.name).copied().unwrap_or(HealthState::Unknown);
                if previous == current && !forced {
                    continue;
                }
                states.insert(replica.name.clone(), current);
                previous
            };

            match current {
                HealthState::Healthy => {
                    tracing::info!("Database {} status changed to healthy", replica.name)
                }
                _ => tracing::warn!("Database {} status changed to {}", replica.name, current),
            }

            self.notify(&replica.name, current).await;
            transitions.push(HealthTransition {
                replica: replica.name.clone(),
                previous,
                current,
            });
        }

        transitions
    }

    /// Connect-then-close probe; any failure means unhealthy
    async fn probe(&self, replica: &ReplicaDescriptor) -> HealthState {
        match self.client.connect(&replica.connection_spec).await {
            Ok(conn) => {
                if let Err(e) = conn.close().await {
                    tracing::debug!("Error closing probe connection to {}: {}", replica.name, e);
                }
                HealthState::Healthy
            }
            Err(e) => {
                tracing::debug!("Probe of {} failed: {}", replica.name, e);
                HealthState::Unhealthy
            }
        }
    }

    /// Ask for `replica`'s next probe outcome to be emitted even if it
    /// matches the stored state. Used when a caller saw the replica fail
    /// outside the probe loop.
    pub async fn suspect(&self, replica: &str) {
        if self.replicas.iter().any(|r| r.name == replica) {
            self.suspects.lock().await.insert(replica.to_string());
        }
    }

    /// Current classification of a replica
    pub async fn state_of(&self, replica: &str) -> Option<HealthState> {
        self.states.read().await.get(replica).copied()
    }

    /// Classification of every replica, in probe order
    pub async fn states(&self) -> Vec<(String, HealthState)> {
        let states = self.states.read().await;
        self.replicas
            .iter()
            .map(|r| {
                let state = states.get(&r.name).copied().unwrap_or(HealthState::Unknown);
                (r.name.clone(), state)
            })
            .collect()
    }

    /// Start periodic probing in the background.
    ///
    /// The first cycle runs one `interval` after the call; run
    /// `probe_once` beforehand for an immediate classification. The next
    /// cycle is scheduled only after the previous one completed.
    pub fn run(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            tracing::info!("Health monitor started, interval {:?}", interval);
            loop {
                tokio::select! {
                    _ = monitor.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                monitor.probe_once().await;
            }
            tracing::info!("Health monitor stopped");
        })
    }

    /// Cancel the pending cycle; a cycle already probing runs to completion
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
