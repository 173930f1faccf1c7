pub mod models;
pub mod payloads;
pub mod transform;

pub use models::{
    Approval, ChangeSize, MergeOutcome, MergeRequest, MergeRequestState, Project,
};
pub use payloads::{
    ApprovalsPayload, ComparePayload, DiffPayload, MergeRequestPayload, ProjectPayload, UserRef,
};
pub use transform::{
    count_diff_lines, normalize_approval, normalize_change_size, normalize_merge_request,
    normalize_outcome, normalize_project, outcome_duration_secs, parse_change_count,
};
