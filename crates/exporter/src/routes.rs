use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use collector::SnapshotStore;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use tracing::instrument;

use crate::error::ApiResult;
use crate::snapshot_exporter::SnapshotExporter;

pub struct ExporterState {
    pub registry: Registry,
    pub metrics_path: String,
    pub store: SnapshotStore,
}

impl ExporterState {
    /// Registers a [`SnapshotExporter`] over `store` in a dedicated registry.
    pub fn new(store: SnapshotStore, metrics_path: impl Into<String>) -> prometheus::Result<Self> {
        let registry = Registry::new();
        registry.register(Box::new(SnapshotExporter::new(store.clone())?))?;
        Ok(Self {
            registry,
            metrics_path: metrics_path.into(),
            store,
        })
    }
}

pub fn build_router(state: Arc<ExporterState>) -> Router {
    let metrics_path = state.metrics_path.clone();
    Router::new()
        .route("/", get(landing))
        .route("/healthz", get(healthz))
        .route(&metrics_path, get(metrics))
        .with_state(state)
}

async fn landing(State(state): State<Arc<ExporterState>>) -> Html<String> {
    Html(format!(
        "<html>\n<head><title>GitLab Extra Exporter</title></head>\n<body>\n\
         <h1>GitLab Extra Exporter</h1>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n</body>\n</html>\n",
        path = state.metrics_path
    ))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    up: bool,
    collected_at: Option<DateTime<Utc>>,
    projects: usize,
    merge_requests: usize,
}

async fn healthz(State(state): State<Arc<ExporterState>>) -> Json<Health> {
    let current = state.store.current();
    Json(Health {
        status: "ok",
        up: current.up,
        collected_at: current.snapshot.collected_at,
        projects: current.snapshot.projects.len(),
        merge_requests: current.snapshot.merge_requests.len(),
    })
}

/// Snapshot gauges first, then the process-wide self metrics.
#[instrument(skip(state))]
async fn metrics(State(state): State<Arc<ExporterState>>) -> ApiResult<impl IntoResponse> {
    let encoder = TextEncoder::new();
    let mut metric_families = state.registry.gather();
    metric_families.extend(prometheus::gather());
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    ))
}
