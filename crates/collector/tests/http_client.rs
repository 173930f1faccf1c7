use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use collector::{GitlabClient, HttpGitlabClient, MergeRequestQuery, UpstreamError};
use common::config::GitlabConfig;
use serde_json::{json, Value};

const TOKEN: &str = "glpat-test";

#[derive(Clone, Default)]
struct Recorded {
    requests: Arc<Mutex<Vec<(String, HashMap<String, String>)>>>,
}

impl Recorded {
    fn push(&self, path: &str, query: HashMap<String, String>) {
        self.requests.lock().unwrap().push((path.to_string(), query));
    }

    fn for_path(&self, path: &str) -> Vec<HashMap<String, String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, q)| q.clone())
            .collect()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("PRIVATE-TOKEN")
        .and_then(|value| value.to_str().ok())
        == Some(TOKEN)
}

fn page(query: &HashMap<String, String>) -> u32 {
    query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1)
}

async fn projects(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "401 Unauthorized"})));
    }
    let current = page(&query);
    recorded.push("projects", query);
    let body = match current {
        1 => json!([
            {"id": 1, "path_with_namespace": "group/one"},
            {"id": 2, "path_with_namespace": "group/two"}
        ]),
        2 => json!([{"id": 3, "path_with_namespace": "group/three"}]),
        _ => json!([]),
    };
    (StatusCode::OK, Json(body))
}

async fn merge_requests(
    State(recorded): State<Recorded>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let current = page(&query);
    recorded.push("merge_requests", query);
    match current {
        1 => (
            StatusCode::OK,
            Json(json!([{
                "id": 100, "iid": 7, "project_id": 1, "state": "opened",
                "title": "Add feature", "target_branch": "master",
                "source_branch": "feature", "created_at": "2024-03-01T10:00:00Z",
                "updated_at": "2024-03-02T10:00:00Z", "merged_at": null,
                "closed_at": null, "assignees": []
            }])),
        ),
        2 => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "boom"})),
        ),
        _ => (StatusCode::OK, Json(json!([]))),
    }
}

async fn merge_request(Path((project, iid)): Path<(String, i64)>) -> Json<Value> {
    Json(json!({
        "id": 100, "iid": iid, "project_id": project.parse::<i64>().unwrap(),
        "state": "merged", "title": "Add feature", "target_branch": "master",
        "source_branch": "feature", "created_at": "2024-03-01T10:00:00Z",
        "updated_at": "2024-03-02T10:00:00Z", "merged_at": "2024-03-01T12:00:00Z",
        "closed_at": null, "changes_count": "1000+", "merge_error": null,
        "assignees": [{"id": 5, "username": "ana"}]
    }))
}

async fn approvals() -> Json<Value> {
    Json(json!({"approvals_required": 2, "approvals_left": 1}))
}

async fn compare(
    State(recorded): State<Recorded>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    recorded.push("compare", query);
    Json(json!({"diffs": [{"diff": "@@ -1 +1 @@\n-old\n+new\n"}]}))
}

async fn spawn_gitlab() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/api/v4/projects", get(projects))
        .route("/api/v4/merge_requests", get(merge_requests))
        .route("/api/v4/projects/:id/merge_requests/:iid", get(merge_request))
        .route(
            "/api/v4/projects/:id/merge_requests/:iid/approvals",
            get(approvals),
        )
        .route("/api/v4/projects/:id/repository/compare", get(compare))
        .with_state(recorded.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), recorded)
}

fn client_for(uri: &str, api_key: &str) -> HttpGitlabClient {
    HttpGitlabClient::new(&GitlabConfig {
        uri: uri.to_string(),
        api_key: api_key.to_string(),
        page_size: 2,
        ..GitlabConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn projects_are_paginated_until_an_empty_page() {
    let (uri, recorded) = spawn_gitlab().await;
    let client = client_for(&uri, TOKEN);
    assert_eq!(client.base_url().as_str(), format!("{uri}/api/v4/"));

    let projects = client.list_projects().await.unwrap();

    let paths: Vec<_> = projects
        .iter()
        .map(|p| p.path_with_namespace.as_str())
        .collect();
    assert_eq!(paths, vec!["group/one", "group/two", "group/three"]);
    let requests = recorded.for_path("projects");
    assert_eq!(requests.len(), 3);
    for (index, query) in requests.iter().enumerate() {
        assert_eq!(query.get("page"), Some(&(index + 1).to_string()));
        assert_eq!(query.get("per_page").map(String::as_str), Some("2"));
        assert_eq!(query.get("archived").map(String::as_str), Some("false"));
        assert_eq!(query.get("simple").map(String::as_str), Some("true"));
    }
}

#[tokio::test]
async fn archived_projects_can_be_included() {
    let (uri, recorded) = spawn_gitlab().await;
    let client = HttpGitlabClient::new(&GitlabConfig {
        uri,
        api_key: TOKEN.into(),
        include_archived: true,
        ..GitlabConfig::default()
    })
    .unwrap();

    client.list_projects().await.unwrap();

    let requests = recorded.for_path("projects");
    assert!(requests.iter().all(|q| !q.contains_key("archived")));
}

#[tokio::test]
async fn rejected_token_surfaces_http_status() {
    let (uri, _) = spawn_gitlab().await;
    let client = client_for(&uri, "wrong");

    let err = client.list_projects().await.unwrap_err();

    assert!(matches!(err, UpstreamError::Http { .. }), "{err:?}");
    assert_eq!(err.status_code(), Some(reqwest::StatusCode::UNAUTHORIZED));
}

#[tokio::test]
async fn failing_page_discards_earlier_pages() {
    let (uri, recorded) = spawn_gitlab().await;
    let client = client_for(&uri, TOKEN);
    let since = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

    let err = client
        .list_merge_requests(&MergeRequestQuery::recently_updated(since, "master"))
        .await
        .unwrap_err();

    assert_eq!(
        err.status_code(),
        Some(reqwest::StatusCode::INTERNAL_SERVER_ERROR)
    );
    let first = &recorded.for_path("merge_requests")[0];
    assert_eq!(first.get("updated_after").map(String::as_str), Some("2024-03-01T00:00:00Z"));
    assert_eq!(first.get("target_branch").map(String::as_str), Some("master"));
    assert_eq!(first.get("scope").map(String::as_str), Some("all"));
    assert_eq!(first.get("wip").map(String::as_str), Some("no"));
}

#[tokio::test]
async fn detail_endpoints_decode_payloads() {
    let (uri, recorded) = spawn_gitlab().await;
    let client = client_for(&uri, TOKEN);

    let detail = client.get_merge_request("1", 7).await.unwrap();
    assert_eq!(detail.iid, 7);
    assert_eq!(detail.changes_count.as_deref(), Some("1000+"));
    assert_eq!(detail.assignees.len(), 1);

    let approvals = client.get_approval_configuration("1", 7).await.unwrap();
    assert_eq!(approvals.approvals_left, 1);

    let compare = client.compare_branches("1", "master", "feature").await.unwrap();
    assert_eq!(compare.diffs.len(), 1);
    let query = &recorded.for_path("compare")[0];
    assert_eq!(query.get("from").map(String::as_str), Some("master"));
    assert_eq!(query.get("to").map(String::as_str), Some("feature"));
}
