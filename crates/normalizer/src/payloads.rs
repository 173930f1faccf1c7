use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectPayload {
    pub id: i64,
    pub path_with_namespace: String,
}

/// Shared by the list endpoint and the single merge request endpoint; the
/// detail-only fields are absent from list items.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequestPayload {
    pub id: i64,
    pub iid: i64,
    pub project_id: i64,
    pub state: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub target_branch: String,
    #[serde(default)]
    pub source_branch: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub changes_count: Option<String>,
    #[serde(default)]
    pub merge_error: Option<String>,
    #[serde(default)]
    pub assignees: Vec<UserRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRef {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalsPayload {
    #[serde(default)]
    pub approvals_left: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComparePayload {
    #[serde(default)]
    pub diffs: Vec<DiffPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiffPayload {
    #[serde(default)]
    pub diff: String,
}
