use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use common::config::GitlabConfig;
use common::AppError;
use normalizer::{
    ApprovalsPayload, ComparePayload, MergeRequestPayload, MergeRequestState, ProjectPayload,
};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

use crate::metrics;

const API_PREFIX: &str = "api/v4/";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("gitlab api error: {status} for {endpoint}")]
    Http {
        status: StatusCode,
        endpoint: String,
    },
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected payload from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
}

impl UpstreamError {
    pub fn status(status: StatusCode, endpoint: impl Into<String>) -> Self {
        Self::Http {
            status,
            endpoint: endpoint.into(),
        }
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            UpstreamError::Http { status, .. } => Some(*status),
            UpstreamError::Transport { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// Filters for the instance-wide merge request listing.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequestQuery {
    pub updated_after: DateTime<Utc>,
    pub target_branch: String,
    pub scope: String,
    pub exclude_wip: bool,
    pub state: Option<MergeRequestState>,
}

impl MergeRequestQuery {
    pub fn recently_updated(updated_after: DateTime<Utc>, target_branch: impl Into<String>) -> Self {
        Self {
            updated_after,
            target_branch: target_branch.into(),
            scope: "all".to_string(),
            exclude_wip: true,
            state: None,
        }
    }

    pub fn with_state(mut self, state: MergeRequestState) -> Self {
        self.state = Some(state);
        self
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            (
                "updated_after",
                self.updated_after.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("target_branch", self.target_branch.clone()),
            ("scope", self.scope.clone()),
        ];
        if self.exclude_wip {
            params.push(("wip", "no".to_string()));
        }
        if let Some(state) = self.state {
            params.push(("state", state.as_str().to_string()));
        }
        params
    }
}

#[async_trait]
pub trait GitlabClient: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<ProjectPayload>, UpstreamError>;
    async fn list_merge_requests(
        &self,
        query: &MergeRequestQuery,
    ) -> Result<Vec<MergeRequestPayload>, UpstreamError>;
    async fn get_merge_request(
        &self,
        project_id: &str,
        internal_id: i64,
    ) -> Result<MergeRequestPayload, UpstreamError>;
    async fn get_approval_configuration(
        &self,
        project_id: &str,
        internal_id: i64,
    ) -> Result<ApprovalsPayload, UpstreamError>;
    async fn compare_branches(
        &self,
        project_id: &str,
        from: &str,
        to: &str,
    ) -> Result<ComparePayload, UpstreamError>;
}

pub struct HttpGitlabClient {
    http: reqwest::Client,
    base: Url,
    page_size: u32,
    include_archived: bool,
}

impl HttpGitlabClient {
    pub fn new(config: &GitlabConfig) -> Result<Self, AppError> {
        let base = api_base(&config.uri)?;

        let mut headers = HeaderMap::new();
        let mut token = HeaderValue::from_str(config.api_key.trim())
            .map_err(|_| AppError::invalid("gitlab.api_key", "not a valid header value"))?;
        token.set_sensitive(true);
        headers.insert("PRIVATE-TOKEN", token);
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .user_agent(concat!("gitlab-extra-exporter/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(AppError::http)?;

        Ok(Self {
            http,
            base,
            page_size: config.page_size.clamp(1, 100),
            include_archived: config.include_archived,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn get_json<T: DeserializeOwned>(&self, url: Url, op: &str) -> Result<T, UpstreamError> {
        let endpoint = url.path().trim_start_matches('/').to_string();
        debug!(endpoint = %endpoint, op, "dispatching gitlab request");
        let start = Instant::now();
        let result = self.execute::<T>(url, &endpoint).await;
        let outcome = if result.is_ok() { "success" } else { "error" };
        metrics::UPSTREAM_REQUESTS_TOTAL
            .with_label_values(&[op, outcome])
            .inc();
        metrics::UPSTREAM_LATENCY_SECONDS
            .with_label_values(&[op])
            .observe(start.elapsed().as_secs_f64());
        result
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        url: Url,
        endpoint: &str,
    ) -> Result<T, UpstreamError> {
        let transport = |source| UpstreamError::Transport {
            endpoint: endpoint.to_string(),
            source,
        };
        let response = self.http.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::status(status, endpoint));
        }
        let body = response.bytes().await.map_err(transport)?;
        serde_json::from_slice(&body).map_err(|source| UpstreamError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    /// Requests successive pages until one comes back empty. Any failing page
    /// discards everything accumulated so far.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        op: &str,
    ) -> Result<Vec<T>, UpstreamError> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let mut url = self.join(path)?;
            Self::with_query(&mut url, params);
            Self::with_query(
                &mut url,
                &[
                    ("page", page.to_string()),
                    ("per_page", self.page_size.to_string()),
                ],
            );
            let batch: Vec<T> = self.get_json(url, op).await?;
            if batch.is_empty() {
                break;
            }
            items.extend(batch);
            page += 1;
        }
        Ok(items)
    }

    fn join(&self, path: &str) -> Result<Url, UpstreamError> {
        Ok(self.base.join(path)?)
    }

    fn with_query(url: &mut Url, params: &[(&str, String)]) {
        let mut query_pairs = url.query_pairs_mut();
        for (key, val) in params {
            query_pairs.append_pair(key, val);
        }
    }
}

#[async_trait]
impl GitlabClient for HttpGitlabClient {
    async fn list_projects(&self) -> Result<Vec<ProjectPayload>, UpstreamError> {
        let mut params = vec![("simple", "true".to_string())];
        if !self.include_archived {
            params.push(("archived", "false".to_string()));
        }
        let projects: Vec<ProjectPayload> =
            self.get_all_pages("projects", &params, "projects").await?;
        info!(count = projects.len(), "fetched projects");
        Ok(projects)
    }

    async fn list_merge_requests(
        &self,
        query: &MergeRequestQuery,
    ) -> Result<Vec<MergeRequestPayload>, UpstreamError> {
        let merge_requests: Vec<MergeRequestPayload> = self
            .get_all_pages("merge_requests", &query.params(), "merge_requests")
            .await?;
        info!(count = merge_requests.len(), "fetched merge requests");
        Ok(merge_requests)
    }

    async fn get_merge_request(
        &self,
        project_id: &str,
        internal_id: i64,
    ) -> Result<MergeRequestPayload, UpstreamError> {
        let path = format!("projects/{project_id}/merge_requests/{internal_id}");
        let url = self.join(&path)?;
        self.get_json(url, "merge_request").await
    }

    async fn get_approval_configuration(
        &self,
        project_id: &str,
        internal_id: i64,
    ) -> Result<ApprovalsPayload, UpstreamError> {
        let path = format!("projects/{project_id}/merge_requests/{internal_id}/approvals");
        let url = self.join(&path)?;
        self.get_json(url, "approvals").await
    }

    async fn compare_branches(
        &self,
        project_id: &str,
        from: &str,
        to: &str,
    ) -> Result<ComparePayload, UpstreamError> {
        let path = format!("projects/{project_id}/repository/compare");
        let mut url = self.join(&path)?;
        Self::with_query(&mut url, &[("from", from.to_string()), ("to", to.to_string())]);
        self.get_json(url, "compare").await
    }
}

/// Normalizes an instance URI to its `/api/v4/` root.
fn api_base(uri: &str) -> Result<Url, AppError> {
    let mut base = Url::parse(uri.trim())
        .map_err(|err| AppError::invalid("gitlab.uri", err.to_string()))?;
    if base.cannot_be_a_base() {
        return Err(AppError::invalid("gitlab.uri", "not a base url"));
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    if !base.path().ends_with(API_PREFIX) {
        base = base
            .join(API_PREFIX)
            .map_err(|err| AppError::invalid("gitlab.uri", err.to_string()))?;
    }
    Ok(base)
}
