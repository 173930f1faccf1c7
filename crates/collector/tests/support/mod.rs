#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use collector::client::{GitlabClient, MergeRequestQuery, UpstreamError};
use normalizer::{
    ApprovalsPayload, ComparePayload, DiffPayload, MergeRequestPayload, ProjectPayload,
};
use reqwest::StatusCode;
use serde_json::json;

pub fn project(id: i64, path: &str) -> ProjectPayload {
    ProjectPayload {
        id,
        path_with_namespace: path.to_string(),
    }
}

pub fn merge_request(id: i64, iid: i64, project_id: i64, state: &str) -> MergeRequestPayload {
    serde_json::from_value(json!({
        "id": id,
        "iid": iid,
        "project_id": project_id,
        "state": state,
        "title": format!("Change {iid}"),
        "target_branch": "master",
        "source_branch": format!("feature-{iid}"),
        "created_at": "2024-03-01T10:00:00Z",
        "updated_at": "2024-03-02T10:00:00Z",
        "merged_at": if state == "merged" { json!("2024-03-01T11:00:00Z") } else { json!(null) },
        "closed_at": if state == "closed" { json!("2024-03-01T10:30:00Z") } else { json!(null) },
        "changes_count": "4",
        "assignees": [{"id": 1, "username": "ana"}]
    }))
    .expect("valid merge request payload")
}

/// In-memory GitLab double. Detail calls answer with the listed payload
/// unless an override is registered.
#[derive(Default)]
pub struct StubGitlab {
    pub projects: Vec<ProjectPayload>,
    pub merge_requests: Vec<MergeRequestPayload>,
    pub details: HashMap<i64, MergeRequestPayload>,
    pub failing_details: HashSet<i64>,
    pub fail_projects: bool,
    pub fail_approvals: bool,
    pub approvals_left: i64,
    pub diff: String,
    calls: Mutex<Vec<String>>,
    queries: Mutex<Vec<MergeRequestQuery>>,
}

impl StubGitlab {
    pub fn new(projects: Vec<ProjectPayload>, merge_requests: Vec<MergeRequestPayload>) -> Self {
        Self {
            projects,
            merge_requests,
            approvals_left: 1,
            diff: "@@ -1 +1,2 @@\n-a\n+b\n+c\n".to_string(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    pub fn queries(&self) -> Vec<MergeRequestQuery> {
        self.queries.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl GitlabClient for StubGitlab {
    async fn list_projects(&self) -> Result<Vec<ProjectPayload>, UpstreamError> {
        self.record("projects".into());
        if self.fail_projects {
            return Err(UpstreamError::status(StatusCode::BAD_GATEWAY, "projects"));
        }
        Ok(self.projects.clone())
    }

    async fn list_merge_requests(
        &self,
        query: &MergeRequestQuery,
    ) -> Result<Vec<MergeRequestPayload>, UpstreamError> {
        self.record("merge_requests".into());
        self.queries.lock().unwrap().push(query.clone());
        Ok(self.merge_requests.clone())
    }

    async fn get_merge_request(
        &self,
        project_id: &str,
        internal_id: i64,
    ) -> Result<MergeRequestPayload, UpstreamError> {
        self.record(format!("detail:{project_id}:{internal_id}"));
        // Let sibling partitions make progress before failing.
        tokio::task::yield_now().await;
        if self.failing_details.contains(&internal_id) {
            return Err(UpstreamError::status(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("projects/{project_id}/merge_requests/{internal_id}"),
            ));
        }
        if let Some(detail) = self.details.get(&internal_id) {
            return Ok(detail.clone());
        }
        self.merge_requests
            .iter()
            .find(|mr| mr.iid == internal_id && mr.project_id.to_string() == project_id)
            .cloned()
            .ok_or_else(|| UpstreamError::status(StatusCode::NOT_FOUND, "merge_request"))
    }

    async fn get_approval_configuration(
        &self,
        project_id: &str,
        internal_id: i64,
    ) -> Result<ApprovalsPayload, UpstreamError> {
        self.record(format!("approvals:{project_id}:{internal_id}"));
        if self.fail_approvals {
            return Err(UpstreamError::status(StatusCode::FORBIDDEN, "approvals"));
        }
        Ok(ApprovalsPayload {
            approvals_left: self.approvals_left,
        })
    }

    async fn compare_branches(
        &self,
        project_id: &str,
        from: &str,
        to: &str,
    ) -> Result<ComparePayload, UpstreamError> {
        self.record(format!("compare:{project_id}:{from}..{to}"));
        Ok(ComparePayload {
            diffs: vec![DiffPayload {
                diff: self.diff.clone(),
            }],
        })
    }
}
