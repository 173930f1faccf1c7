use chrono::{DateTime, Utc};

use crate::models::{
    Approval, ChangeSize, MergeOutcome, MergeRequest, MergeRequestState, Project,
    CHANGE_COUNT_CEILING, CHANGE_COUNT_OVERFLOW,
};
use crate::payloads::{
    ApprovalsPayload, ComparePayload, DiffPayload, MergeRequestPayload, ProjectPayload,
};

pub fn normalize_project(payload: &ProjectPayload) -> Project {
    Project {
        id: payload.id.to_string(),
        path_with_namespace: payload.path_with_namespace.clone(),
    }
}

pub fn normalize_merge_request(payload: &MergeRequestPayload) -> MergeRequest {
    MergeRequest {
        id: payload.id.to_string(),
        internal_id: payload.iid,
        project_id: payload.project_id.to_string(),
        state: payload.state.clone(),
        target_branch: payload.target_branch.clone(),
        source_branch: payload.source_branch.clone(),
        title: payload.title.clone(),
        created_at: payload.created_at,
        updated_at: payload.updated_at,
        change_count: payload.changes_count.clone().unwrap_or_default(),
        assignees: payload.assignees.len(),
    }
}

/// Builds the outcome record for a merged or closed merge request detail.
///
/// Returns `None` when GitLab reported a merge error for the request, or when
/// `state` is not a terminal state.
pub fn normalize_outcome(
    payload: &MergeRequestPayload,
    state: MergeRequestState,
) -> Option<MergeOutcome> {
    if payload
        .merge_error
        .as_deref()
        .is_some_and(|err| !err.is_empty())
    {
        return None;
    }
    let finished_at = match state {
        MergeRequestState::Merged => payload.merged_at,
        MergeRequestState::Closed => payload.closed_at,
        MergeRequestState::Opened => return None,
    };
    let merge_request = normalize_merge_request(payload);
    let duration_secs = outcome_duration_secs(merge_request.created_at, finished_at);
    Some(MergeOutcome {
        merge_request,
        finished_at,
        duration_secs,
    })
}

/// Seconds between creation and the terminal event; `0` when either
/// timestamp is missing.
pub fn outcome_duration_secs(
    created_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
) -> f64 {
    match (created_at, finished_at) {
        (Some(created), Some(finished)) => {
            (finished - created).num_milliseconds() as f64 / 1000.0
        }
        _ => 0.0,
    }
}

pub fn parse_change_count(value: &str) -> f64 {
    let trimmed = value.trim();
    if trimmed == CHANGE_COUNT_OVERFLOW {
        return CHANGE_COUNT_CEILING;
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|count| count.is_finite())
        .unwrap_or(0.0)
}

/// Counts added and removed lines across unified diff hunks.
pub fn count_diff_lines(diffs: &[DiffPayload]) -> (u64, u64) {
    diffs.iter().fold((0, 0), |(added, deleted), diff| {
        (
            added + diff.diff.matches("\n+").count() as u64,
            deleted + diff.diff.matches("\n-").count() as u64,
        )
    })
}

pub fn normalize_approval(merge_request: &MergeRequest, payload: &ApprovalsPayload) -> Approval {
    Approval {
        merge_request_id: merge_request.id.clone(),
        project_id: merge_request.project_id.clone(),
        approvals_left: payload.approvals_left,
    }
}

pub fn normalize_change_size(merge_request: &MergeRequest, payload: &ComparePayload) -> ChangeSize {
    let (additions, deletions) = count_diff_lines(&payload.diffs);
    ChangeSize {
        merge_request_id: merge_request.id.clone(),
        project_id: merge_request.project_id.clone(),
        additions,
        deletions,
    }
}
