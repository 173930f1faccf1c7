use std::sync::Arc;

use chrono::{DateTime, Utc};
use normalizer::{Approval, ChangeSize, MergeOutcome, MergeRequest, Project};
use tokio::sync::watch;

/// Result of one complete collection cycle. Never mutated after publication.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub projects: Vec<Project>,
    /// Every listed merge request, whatever its state.
    pub merge_requests: Vec<MergeRequest>,
    pub opened: Vec<MergeRequest>,
    pub merged: Vec<MergeOutcome>,
    pub closed: Vec<MergeOutcome>,
    pub approvals: Vec<Approval>,
    pub changes: Vec<ChangeSize>,
    /// `None` only for the empty snapshot served before the first cycle.
    pub collected_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// What a scrape observes: the last published snapshot and whether the most
/// recent cycle succeeded.
#[derive(Debug, Clone)]
pub struct CacheState {
    pub snapshot: Arc<Snapshot>,
    pub up: bool,
}

/// Single-writer, many-reader holder of the current [`Snapshot`].
#[derive(Clone)]
pub struct SnapshotStore {
    tx: Arc<watch::Sender<CacheState>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CacheState {
            snapshot: Arc::new(Snapshot::empty()),
            up: false,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> CacheState {
        self.tx.borrow().clone()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.tx.borrow().snapshot.clone()
    }

    pub fn publish(&self, snapshot: Snapshot) {
        self.tx.send_replace(CacheState {
            snapshot: Arc::new(snapshot),
            up: true,
        });
    }

    /// Keeps the previous snapshot and reports the cycle as down.
    pub fn mark_failed(&self) {
        self.tx.send_modify(|state| state.up = false);
    }

    pub fn subscribe(&self) -> watch::Receiver<CacheState> {
        self.tx.subscribe()
    }
}
