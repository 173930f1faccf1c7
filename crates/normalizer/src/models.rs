use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value GitLab reports instead of a count for very large diffs.
pub const CHANGE_COUNT_OVERFLOW: &str = "1000+";
pub const CHANGE_COUNT_CEILING: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeRequestState {
    Opened,
    Merged,
    Closed,
}

impl MergeRequestState {
    /// States other than the three tracked lifecycle states yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "opened" => Some(Self::Opened),
            "merged" => Some(Self::Merged),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Merged => "merged",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for MergeRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub path_with_namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeRequest {
    pub id: String,
    pub internal_id: i64,
    pub project_id: String,
    pub state: String,
    pub target_branch: String,
    pub source_branch: String,
    pub title: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Kept as reported; see [`MergeRequest::changed_files`].
    pub change_count: String,
    pub assignees: usize,
}

impl MergeRequest {
    pub fn lifecycle(&self) -> Option<MergeRequestState> {
        MergeRequestState::parse(&self.state)
    }

    pub fn changed_files(&self) -> f64 {
        crate::transform::parse_change_count(&self.change_count)
    }
}

/// Terminal event of a merged or closed merge request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeOutcome {
    pub merge_request: MergeRequest,
    /// `None` when GitLab did not report the timestamp.
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Approval {
    pub merge_request_id: String,
    pub project_id: String,
    pub approvals_left: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeSize {
    pub merge_request_id: String,
    pub project_id: String,
    pub additions: u64,
    pub deletions: u64,
}
