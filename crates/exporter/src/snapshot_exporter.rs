use chrono::{DateTime, Utc};
use collector::{CacheState, SnapshotStore};
use normalizer::{MergeOutcome, MergeRequest};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, GaugeVec, Opts};
use tracing::warn;

const MR_LABELS: &[&str] = &["merge_request_id", "project_id"];

struct GaugeDef {
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
}

const UP: GaugeDef = GaugeDef {
    name: "gitlab_extra_up",
    help: "Whether the last GitLab collection cycle succeeded",
    labels: &[],
};
const PROJECT_INFO: GaugeDef = GaugeDef {
    name: "gitlab_project_info",
    help: "General information about projects",
    labels: &["project_id", "project_name"],
};
const MR_INFO: GaugeDef = GaugeDef {
    name: "gitlab_merge_request_info",
    help: "General information about merge requests",
    labels: &[
        "merge_request_id",
        "target_branch",
        "state",
        "title",
        "project_id",
        "internal_id",
    ],
};
const MR_CREATED: GaugeDef = GaugeDef {
    name: "gitlab_merge_request_created",
    help: "Creation time of the merge request in unix seconds",
    labels: MR_LABELS,
};
const MR_UPDATED: GaugeDef = GaugeDef {
    name: "gitlab_merge_request_updated",
    help: "Seconds since the merge request was last updated",
    labels: MR_LABELS,
};
const MR_CLOSED: GaugeDef = GaugeDef {
    name: "gitlab_merge_request_closed",
    help: "Closing time of the merge request in unix seconds",
    labels: MR_LABELS,
};
const MR_MERGED: GaugeDef = GaugeDef {
    name: "gitlab_merge_request_merged",
    help: "Merge time of the merge request in unix seconds",
    labels: MR_LABELS,
};
const MR_CHANGED_FILES: GaugeDef = GaugeDef {
    name: "gitlab_merge_request_changed_files",
    help: "Number of files changed by the merge request",
    labels: MR_LABELS,
};
const MR_ASSIGNEES: GaugeDef = GaugeDef {
    name: "gitlab_merge_request_assignees",
    help: "Number of assignees on the merge request",
    labels: MR_LABELS,
};
const MR_DURATION: GaugeDef = GaugeDef {
    name: "gitlab_merge_request_duration",
    help: "Seconds between creating and closing or merging the merge request",
    labels: MR_LABELS,
};
const MR_APPROVALS: GaugeDef = GaugeDef {
    name: "gitlab_merge_request_approvals",
    help: "Approvals still required before the merge request can be merged",
    labels: MR_LABELS,
};
const MR_CHANGES: GaugeDef = GaugeDef {
    name: "gitlab_merge_request_changes",
    help: "Lines added and deleted by the merge request",
    labels: &["merge_request_id", "project_id", "lines"],
};

const ALL: &[&GaugeDef] = &[
    &UP,
    &PROJECT_INFO,
    &MR_INFO,
    &MR_CREATED,
    &MR_UPDATED,
    &MR_CLOSED,
    &MR_MERGED,
    &MR_CHANGED_FILES,
    &MR_ASSIGNEES,
    &MR_DURATION,
    &MR_APPROVALS,
    &MR_CHANGES,
];

impl GaugeDef {
    fn opts(&self) -> Opts {
        Opts::new(self.name, self.help)
    }

    fn vec(&self) -> prometheus::Result<GaugeVec> {
        GaugeVec::new(self.opts(), self.labels)
    }

    fn desc(&self) -> prometheus::Result<Desc> {
        Desc::new(
            self.name.to_string(),
            self.help.to_string(),
            self.labels.iter().map(|label| label.to_string()).collect(),
            Default::default(),
        )
    }
}

/// Exposes the cached [`collector::Snapshot`] as gauges.
///
/// Families are rebuilt from the store on every scrape, so series belonging
/// to merge requests that dropped out of the window disappear with the next
/// published snapshot.
pub struct SnapshotExporter {
    store: SnapshotStore,
    descs: Vec<Desc>,
}

impl SnapshotExporter {
    pub fn new(store: SnapshotStore) -> prometheus::Result<Self> {
        let descs = ALL
            .iter()
            .map(|def| def.desc())
            .collect::<prometheus::Result<Vec<_>>>()?;
        Ok(Self { store, descs })
    }

    /// Renders the families for a given cache state.
    pub fn render(state: &CacheState, now: DateTime<Utc>) -> prometheus::Result<Vec<MetricFamily>> {
        let families = Families::new()?;
        families.fill(state, now);
        Ok(families.collect())
    }
}

impl Collector for SnapshotExporter {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let state = self.store.current();
        match Self::render(&state, Utc::now()) {
            Ok(families) => families,
            Err(err) => {
                warn!(error = %err, "failed to render snapshot metrics");
                Vec::new()
            }
        }
    }
}

struct Families {
    up: Gauge,
    project_info: GaugeVec,
    merge_request_info: GaugeVec,
    created: GaugeVec,
    updated: GaugeVec,
    closed: GaugeVec,
    merged: GaugeVec,
    changed_files: GaugeVec,
    assignees: GaugeVec,
    duration: GaugeVec,
    approvals: GaugeVec,
    changes: GaugeVec,
}

impl Families {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            up: Gauge::with_opts(UP.opts())?,
            project_info: PROJECT_INFO.vec()?,
            merge_request_info: MR_INFO.vec()?,
            created: MR_CREATED.vec()?,
            updated: MR_UPDATED.vec()?,
            closed: MR_CLOSED.vec()?,
            merged: MR_MERGED.vec()?,
            changed_files: MR_CHANGED_FILES.vec()?,
            assignees: MR_ASSIGNEES.vec()?,
            duration: MR_DURATION.vec()?,
            approvals: MR_APPROVALS.vec()?,
            changes: MR_CHANGES.vec()?,
        })
    }

    fn fill(&self, state: &CacheState, now: DateTime<Utc>) {
        self.up.set(if state.up { 1.0 } else { 0.0 });
        let snapshot = &state.snapshot;

        for project in &snapshot.projects {
            self.project_info
                .with_label_values(&[project.id.as_str(), project.path_with_namespace.as_str()])
                .set(1.0);
        }

        for mr in &snapshot.merge_requests {
            let internal_id = mr.internal_id.to_string();
            self.merge_request_info
                .with_label_values(&[
                    mr.id.as_str(),
                    mr.target_branch.as_str(),
                    mr.state.as_str(),
                    mr.title.as_str(),
                    mr.project_id.as_str(),
                    internal_id.as_str(),
                ])
                .set(1.0);
        }

        for mr in &snapshot.opened {
            self.merge_request_gauges(mr, now);
        }
        for outcome in &snapshot.closed {
            self.outcome_gauges(outcome, &self.closed, now);
        }
        for outcome in &snapshot.merged {
            self.outcome_gauges(outcome, &self.merged, now);
        }

        for approval in &snapshot.approvals {
            self.approvals
                .with_label_values(&[
                    approval.merge_request_id.as_str(),
                    approval.project_id.as_str(),
                ])
                .set(approval.approvals_left as f64);
        }

        for change in &snapshot.changes {
            let id = change.merge_request_id.as_str();
            let project = change.project_id.as_str();
            self.changes
                .with_label_values(&[id, project, "added"])
                .set(change.additions as f64);
            self.changes
                .with_label_values(&[id, project, "deleted"])
                .set(change.deletions as f64);
        }
    }

    fn merge_request_gauges(&self, mr: &MergeRequest, now: DateTime<Utc>) {
        let labels = [mr.id.as_str(), mr.project_id.as_str()];
        self.created
            .with_label_values(&labels)
            .set(unix_seconds(mr.created_at));
        self.updated
            .with_label_values(&labels)
            .set(seconds_since(mr.updated_at, now));
        self.changed_files
            .with_label_values(&labels)
            .set(mr.changed_files());
        self.assignees
            .with_label_values(&labels)
            .set(mr.assignees as f64);
    }

    fn outcome_gauges(&self, outcome: &MergeOutcome, finished: &GaugeVec, now: DateTime<Utc>) {
        let mr = &outcome.merge_request;
        let labels = [mr.id.as_str(), mr.project_id.as_str()];
        self.merge_request_gauges(mr, now);
        finished
            .with_label_values(&labels)
            .set(unix_seconds(outcome.finished_at));
        self.duration
            .with_label_values(&labels)
            .set(outcome.duration_secs);
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let collectors: [&dyn Collector; 12] = [
            &self.up,
            &self.project_info,
            &self.merge_request_info,
            &self.created,
            &self.updated,
            &self.closed,
            &self.merged,
            &self.changed_files,
            &self.assignees,
            &self.duration,
            &self.approvals,
            &self.changes,
        ];
        collectors
            .iter()
            .flat_map(|gauges| gauges.collect())
            .filter(|family| !family.get_metric().is_empty())
            .collect()
    }
}

fn unix_seconds(at: Option<DateTime<Utc>>) -> f64 {
    at.map(|at| at.timestamp() as f64).unwrap_or(0.0)
}

fn seconds_since(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    at.map(|at| ((now - at).num_milliseconds() as f64 / 1000.0).round())
        .unwrap_or(0.0)
}
