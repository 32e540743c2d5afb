//! Reconfiguration coordinator.
//!
//! Holds the latest raw documents and replica count, and on every change
//! rebuilds the descriptor tree and limiter bank from scratch and publishes
//! them together. Updates are serialized by one mutex that the read path
//! never touches.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, ShardlimitError};
use crate::ratelimit::{
    Configuration, DocumentError, LimiterBank, Snapshot, SnapshotHandle, Stats,
};

/// Raw configuration documents by name. Ordered, so load order is by name.
pub type Documents = BTreeMap<String, Vec<u8>>;

/// Capacity of the coordinator's event queue.
const EVENT_BUFFER: usize = 16;

/// Errors that leave the previously published snapshot in place.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("no valid rate limit configuration ({} document(s) rejected)", .rejected.len())]
    NoValidDocuments { rejected: Vec<DocumentError> },
}

/// What a successful rebuild published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadSummary {
    pub domains: usize,
    pub limits: usize,
    pub replicas: u32,
    /// Documents skipped because they failed to load.
    pub rejected: Vec<DocumentError>,
}

/// Inputs to the coordinator, as delivered by configuration sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconfigureEvent {
    ConfigChanged(Documents),
    ReplicaCountChanged(u32),
}

#[derive(Debug, Default)]
struct CoordinatorState {
    documents: Documents,
    replicas: u32,
}

/// Owns the write side of the snapshot slot.
#[derive(Debug)]
pub struct Coordinator {
    state: Mutex<CoordinatorState>,
    snapshots: SnapshotHandle,
    stats: Arc<Stats>,
}

impl Coordinator {
    pub fn new(snapshots: SnapshotHandle, stats: Arc<Stats>) -> Self {
        Self {
            state: Mutex::new(CoordinatorState::default()),
            snapshots,
            stats,
        }
    }

    /// Start with a known replica count. Nothing is published until the
    /// first document set arrives.
    pub fn with_replicas(snapshots: SnapshotHandle, stats: Arc<Stats>, replicas: u32) -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                documents: Documents::new(),
                replicas,
            }),
            snapshots,
            stats,
        }
    }

    pub fn snapshots(&self) -> &SnapshotHandle {
        &self.snapshots
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Replace the document set and rebuild.
    pub fn on_configuration_changed(
        &self,
        documents: Documents,
    ) -> std::result::Result<ReloadSummary, ReloadError> {
        let mut state = self.state.lock();
        info!(documents = documents.len(), "Configuration changed");
        state.documents = documents;
        self.rebuild(&state)
    }

    /// Record a new replica count and rebuild.
    pub fn on_replica_count_changed(
        &self,
        replicas: u32,
    ) -> std::result::Result<ReloadSummary, ReloadError> {
        let mut state = self.state.lock();
        info!(replicas = replicas, "Replica count changed");
        state.replicas = replicas;
        self.rebuild(&state)
    }

    /// Apply one event.
    pub fn handle(&self, event: ReconfigureEvent) -> std::result::Result<ReloadSummary, ReloadError> {
        match event {
            ReconfigureEvent::ConfigChanged(documents) => self.on_configuration_changed(documents),
            ReconfigureEvent::ReplicaCountChanged(replicas) => {
                self.on_replica_count_changed(replicas)
            }
        }
    }

    /// Build a new snapshot from the stored inputs and publish it.
    ///
    /// The caller holds the state lock, so rebuilds never interleave.
    fn rebuild(&self, state: &CoordinatorState) -> std::result::Result<ReloadSummary, ReloadError> {
        let (mut config, rejected) = Configuration::load(state.documents.iter());

        if config.domain_count() == 0 {
            self.stats.record_load_error();
            error!(
                documents = state.documents.len(),
                rejected = rejected.len(),
                "Load config failed, keeping previous configuration"
            );
            return Err(ReloadError::NoValidDocuments { rejected });
        }

        config.divide_by_replicas(state.replicas);
        let limits = config.collect_limit_keys();
        debug!(limits = ?limits.keys().collect::<Vec<_>>(), "Key limits");
        let bank = LimiterBank::from_limits(&limits, &self.stats);
        if bank.is_empty() {
            warn!("Configuration defines no rate limits, every descriptor resolves to UNKNOWN");
        }

        let summary = ReloadSummary {
            domains: config.domain_count(),
            limits: bank.len(),
            replicas: state.replicas,
            rejected,
        };

        self.snapshots.publish(Snapshot {
            config,
            bank,
            replicas: state.replicas,
        });
        self.stats.record_load_success();

        if !summary.rejected.is_empty() {
            warn!(
                rejected = summary.rejected.len(),
                "Some configuration documents were skipped"
            );
        }
        info!(
            domains = summary.domains,
            limits = summary.limits,
            replicas = summary.replicas,
            "Published rate limit configuration"
        );
        Ok(summary)
    }

    /// Run the coordinator as a task fed by a channel.
    ///
    /// Events are applied one at a time in arrival order. The task ends once
    /// every [`CoordinatorHandle`] has been dropped.
    pub fn spawn(self: Arc<Self>) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // Failures are logged and counted by `rebuild`.
                let _ = self.handle(event);
            }
            debug!("Coordinator event channel closed");
        });

        (CoordinatorHandle { tx }, task)
    }
}

/// Sending side of a running coordinator task.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<ReconfigureEvent>,
}

impl CoordinatorHandle {
    /// New configuration file set available.
    pub async fn config_changed(&self, documents: Documents) -> Result<()> {
        self.send(ReconfigureEvent::ConfigChanged(documents)).await
    }

    /// New replica count observed.
    pub async fn replica_count_changed(&self, replicas: u32) -> Result<()> {
        self.send(ReconfigureEvent::ReplicaCountChanged(replicas)).await
    }

    async fn send(&self, event: ReconfigureEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ShardlimitError::CoordinatorStopped)
    }
}
