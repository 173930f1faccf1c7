pub mod aggregator;
pub mod client;
pub mod metrics;
pub mod service;
pub mod snapshot;

pub use aggregator::{partition, Aggregator, AggregatorSettings, CycleError, Partitions};
pub use client::{GitlabClient, HttpGitlabClient, MergeRequestQuery, UpstreamError};
pub use service::Collector;
pub use snapshot::{CacheState, Snapshot, SnapshotStore};
