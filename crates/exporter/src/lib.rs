pub mod error;
pub mod routes;
pub mod snapshot_exporter;

pub use routes::{build_router, ExporterState};
pub use snapshot_exporter::SnapshotExporter;
