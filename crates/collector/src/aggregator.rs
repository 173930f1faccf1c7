use std::fmt;
use std::sync::Arc;

use chrono::{Duration, Utc};
use common::config::GitlabConfig;
use normalizer::{
    normalize_approval, normalize_change_size, normalize_merge_request, normalize_outcome,
    normalize_project, Approval, ChangeSize, MergeOutcome, MergeRequest, MergeRequestState,
};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::client::{GitlabClient, MergeRequestQuery, UpstreamError};
use crate::snapshot::Snapshot;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("{partition} merge request enrichment failed: {source}")]
    Partial {
        partition: MergeRequestState,
        #[source]
        source: UpstreamError,
    },
    #[error("enrichment task aborted: {0}")]
    Aborted(String),
}

impl CycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Upstream(_) => "upstream",
            CycleError::Partial { .. } => "partial",
            CycleError::Aborted(_) => "aborted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub target_branch: String,
    pub window: Duration,
    pub fetch_changes: bool,
}

impl AggregatorSettings {
    pub fn from_config(config: &GitlabConfig) -> Self {
        Self {
            target_branch: config.target_branch.clone(),
            window: Duration::days(config.window_days),
            fetch_changes: config.fetch_changes,
        }
    }
}

impl fmt::Display for AggregatorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target_branch={} window_days={} fetch_changes={}",
            self.target_branch,
            self.window.num_days(),
            self.fetch_changes
        )
    }
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self::from_config(&GitlabConfig::default())
    }
}

/// Merge requests grouped by lifecycle state. Requests in any other state
/// are left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partitions {
    pub opened: Vec<MergeRequest>,
    pub merged: Vec<MergeRequest>,
    pub closed: Vec<MergeRequest>,
}

impl Partitions {
    pub fn len(&self) -> usize {
        self.opened.len() + self.merged.len() + self.closed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn partition(merge_requests: &[MergeRequest]) -> Partitions {
    let mut partitions = Partitions::default();
    for mr in merge_requests {
        match mr.lifecycle() {
            Some(MergeRequestState::Opened) => partitions.opened.push(mr.clone()),
            Some(MergeRequestState::Merged) => partitions.merged.push(mr.clone()),
            Some(MergeRequestState::Closed) => partitions.closed.push(mr.clone()),
            None => {}
        }
    }
    partitions
}

enum Enriched {
    Opened(Vec<MergeRequest>),
    Merged(Vec<MergeOutcome>),
    Closed(Vec<MergeOutcome>),
}

#[derive(Default)]
struct EnrichedPartitions {
    opened: Vec<MergeRequest>,
    merged: Vec<MergeOutcome>,
    closed: Vec<MergeOutcome>,
}

pub struct Aggregator {
    client: Arc<dyn GitlabClient>,
    settings: AggregatorSettings,
}

impl Aggregator {
    pub fn new(client: Arc<dyn GitlabClient>, settings: AggregatorSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Runs one full fetch pass. Nothing is returned unless every step
    /// succeeded.
    #[instrument(skip(self), fields(target_branch = %self.settings.target_branch))]
    pub async fn collect(&self) -> Result<Snapshot, CycleError> {
        let projects = self
            .client
            .list_projects()
            .await?
            .iter()
            .map(normalize_project)
            .collect::<Vec<_>>();

        let since = Utc::now() - self.settings.window;
        let query = MergeRequestQuery::recently_updated(since, &self.settings.target_branch);
        let merge_requests = self
            .client
            .list_merge_requests(&query)
            .await?
            .iter()
            .map(normalize_merge_request)
            .collect::<Vec<_>>();

        let partitions = partition(&merge_requests);
        let ignored = merge_requests.len() - partitions.len();
        if ignored > 0 {
            info!(ignored, "skipping merge requests in untracked states");
        }

        let enriched = self.enrich(partitions).await?;
        let approvals = self.fetch_approvals(&enriched.opened).await?;
        let changes = if self.settings.fetch_changes {
            self.fetch_change_sizes(&enriched.opened).await?
        } else {
            Vec::new()
        };

        Ok(Snapshot {
            projects,
            merge_requests,
            opened: enriched.opened,
            merged: enriched.merged,
            closed: enriched.closed,
            approvals,
            changes,
            collected_at: Some(Utc::now()),
        })
    }

    /// Fetches details for the three partitions in parallel. Every task is
    /// drained before returning; the first failure to arrive is reported.
    async fn enrich(&self, partitions: Partitions) -> Result<EnrichedPartitions, CycleError> {
        let Partitions {
            opened,
            merged,
            closed,
        } = partitions;
        let mut tasks = JoinSet::new();
        let client = self.client.clone();
        tasks.spawn(async move {
            enrich_opened(client.as_ref(), opened)
                .await
                .map(Enriched::Opened)
        });
        let client = self.client.clone();
        tasks.spawn(async move {
            enrich_finished(client.as_ref(), merged, MergeRequestState::Merged)
                .await
                .map(Enriched::Merged)
        });
        let client = self.client.clone();
        tasks.spawn(async move {
            enrich_finished(client.as_ref(), closed, MergeRequestState::Closed)
                .await
                .map(Enriched::Closed)
        });

        let mut enriched = EnrichedPartitions::default();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|err| CycleError::Aborted(err.to_string()));
            match result.and_then(|inner| inner) {
                Ok(Enriched::Opened(items)) => enriched.opened = items,
                Ok(Enriched::Merged(items)) => enriched.merged = items,
                Ok(Enriched::Closed(items)) => enriched.closed = items,
                Err(err) => {
                    warn!(error = %err, "merge request enrichment failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(enriched),
        }
    }

    async fn fetch_approvals(&self, opened: &[MergeRequest]) -> Result<Vec<Approval>, CycleError> {
        let mut approvals = Vec::with_capacity(opened.len());
        for mr in opened {
            let payload = self
                .client
                .get_approval_configuration(&mr.project_id, mr.internal_id)
                .await?;
            approvals.push(normalize_approval(mr, &payload));
        }
        Ok(approvals)
    }

    async fn fetch_change_sizes(
        &self,
        opened: &[MergeRequest],
    ) -> Result<Vec<ChangeSize>, CycleError> {
        let mut changes = Vec::with_capacity(opened.len());
        for mr in opened {
            let payload = self
                .client
                .compare_branches(&mr.project_id, &self.settings.target_branch, &mr.source_branch)
                .await?;
            changes.push(normalize_change_size(mr, &payload));
        }
        Ok(changes)
    }
}

async fn enrich_opened(
    client: &dyn GitlabClient,
    merge_requests: Vec<MergeRequest>,
) -> Result<Vec<MergeRequest>, CycleError> {
    let mut details = Vec::with_capacity(merge_requests.len());
    for mr in &merge_requests {
        let payload = client
            .get_merge_request(&mr.project_id, mr.internal_id)
            .await
            .map_err(|source| CycleError::Partial {
                partition: MergeRequestState::Opened,
                source,
            })?;
        details.push(normalize_merge_request(&payload));
    }
    info!(count = details.len(), "enriched opened merge requests");
    Ok(details)
}

async fn enrich_finished(
    client: &dyn GitlabClient,
    merge_requests: Vec<MergeRequest>,
    state: MergeRequestState,
) -> Result<Vec<MergeOutcome>, CycleError> {
    let mut outcomes = Vec::with_capacity(merge_requests.len());
    for mr in &merge_requests {
        let payload = client
            .get_merge_request(&mr.project_id, mr.internal_id)
            .await
            .map_err(|source| CycleError::Partial {
                partition: state,
                source,
            })?;
        outcomes.extend(normalize_outcome(&payload, state));
    }
    info!(count = outcomes.len(), partition = %state, "enriched merge requests");
    Ok(outcomes)
}
