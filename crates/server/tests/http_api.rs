//! End-to-end HTTP flow over an in-memory deployment: track a repository,
//! register a worker, emit a signal, and drive it to completion.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chkd_db::models::repository::{CreateRepository, Repository};
use chkd_db::models::worker::{CreateWorker, Worker};
use chkd_deployment::Deployment;
use chkd_local_deployment::LocalDeployment;
use chkd_server::routes;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn app() -> (axum::Router, LocalDeployment) {
    let deployment = LocalDeployment::open_in_memory().await.unwrap();
    let router = routes::router(&deployment).with_state(deployment.clone());
    (router, deployment)
}

async fn send(router: &axum::Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_check_reports_ok() {
    let (router, _deployment) = app().await;
    let request = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

fn init_git_repo(path: &std::path::Path) {
    let repo = git2::Repository::init(path).unwrap();
    std::fs::write(path.join("README.md"), "hello\n").unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(std::path::Path::new("README.md")).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = git2::Signature::now("tester", "tester@example.com").unwrap();
    let commit = repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
    repo.branch("main", &repo.find_commit(commit).unwrap(), false).unwrap();
    repo.set_head("refs/heads/main").unwrap();
    repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force())).unwrap();
}

#[tokio::test]
async fn full_worker_lifecycle_completes_via_http() {
    let (router, _deployment) = app().await;

    let repo_dir = tempfile::tempdir().unwrap();
    init_git_repo(repo_dir.path());

    let (status, body) = send(
        &router,
        "POST",
        "/api/repositories",
        json!({
            "absolute_path": repo_dir.path().to_string_lossy(),
            "display_name": "my-repo",
            "default_branch": "main",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let repo_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        "POST",
        "/api/workers",
        json!({
            "repo_id": repo_id,
            "username": "alex",
            "task_id": "SD.1",
            "task_title": "Ship the feature",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let worker_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["status"], "waiting");
    assert!(body["data"]["worktree_path"].is_string());
    assert!(body["data"]["branch_name"].is_string());

    let (status, _) = send(
        &router,
        "POST",
        &format!("/api/workers/{worker_id}/transition"),
        json!({ "status": "working" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &router,
        "POST",
        &format!("/api/workers/{worker_id}/heartbeat"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        "GET",
        &format!("/api/signals?repo_id={repo_id}"),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    let (status, _) = send(
        &router,
        "DELETE",
        &format!("/api/repositories/{repo_id}"),
        Value::Null,
    )
    .await;
    // Worker is still pending (not terminal), deletion must be refused.
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn not_found_maps_to_404() {
    let (router, _deployment) = app().await;
    let missing = uuid::Uuid::new_v4();
    let (status, _) = send(
        &router,
        "GET",
        &format!("/api/repositories/{missing}"),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn item_crud_and_tags_round_trip_over_http() {
    let (router, _deployment) = app().await;

    let (_, body) = send(
        &router,
        "POST",
        "/api/repositories",
        json!({ "absolute_path": "/tmp/items-repo", "display_name": "items-repo" }),
    )
    .await;
    let repo_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        "POST",
        "/api/items",
        json!({
            "repo_id": repo_id,
            "display_id": "SD.1",
            "title": "Ship the thing",
            "area_code": "SD",
            "section_number": 1,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "open");
    let item_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        "PUT",
        &format!("/api/items/{item_id}/tags"),
        json!({ "tags": ["urgent", "backend"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let tags: Vec<String> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(tags, vec!["backend".to_string(), "urgent".to_string()]);

    let (status, body) = send(
        &router,
        "GET",
        &format!("/api/items?repo_id={repo_id}&tag=urgent"),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &router,
        "GET",
        &format!("/api/items/progress?repo_id={repo_id}"),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["done"], 0);
}

#[tokio::test]
async fn signal_emit_list_and_dismiss_round_trip_over_http() {
    let (router, _deployment) = app().await;

    let (_, body) = send(
        &router,
        "POST",
        "/api/repositories",
        json!({ "absolute_path": "/tmp/signals-repo", "display_name": "signals-repo" }),
    )
    .await;
    let repo_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        "POST",
        "/api/signals",
        json!({
            "repo_id": repo_id,
            "type": "help",
            "message": "need a hand with a merge",
            "action_required": true,
            "action_options": ["ours", "theirs", "abort"],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["type"], "help");
    assert_eq!(body["data"]["dismissed"], false);
    let signal_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        "GET",
        &format!("/api/signals?repo_id={repo_id}"),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/signals/{signal_id}/dismiss"),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["dismissed"], true);

    let (status, body) = send(
        &router,
        "GET",
        &format!("/api/signals?repo_id={repo_id}"),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn session_lifecycle_and_anchor_round_trip_over_http() {
    let (router, _deployment) = app().await;

    let (_, body) = send(
        &router,
        "POST",
        "/api/repositories",
        json!({ "absolute_path": "/tmp/session-repo", "display_name": "session-repo" }),
    )
    .await;
    let repo_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        "POST",
        "/api/sessions/start",
        json!({ "repo_id": repo_id, "task_id": "SD.1", "task_title": "Ship the feature" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["current_task"], "SD.1");
    assert_eq!(body["data"]["status"], "building");

    let (status, body) = send(
        &router,
        "POST",
        "/api/sessions/also-did",
        json!({ "repo_id": repo_id, "text": "tidied up the readme" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["also_did"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &router,
        "POST",
        "/api/sessions/anchor",
        json!({
            "repo_id": repo_id,
            "task_id": "SD.2",
            "title": "Stay on this one",
            "set_by": "alex",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["anchor_task_id"], "SD.2");

    let (status, body) = send(
        &router,
        "GET",
        &format!("/api/sessions/on-track?repo_id={repo_id}"),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_object());

    let (status, _) = send(
        &router,
        "DELETE",
        &format!("/api/sessions/anchor?repo_id={repo_id}"),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/sessions/clear?repo_id={repo_id}"),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "idle");
}

#[tokio::test]
async fn migration_imports_legacy_markdown_checklist_over_http() {
    let (router, _deployment) = app().await;

    let (_, body) = send(
        &router,
        "POST",
        "/api/repositories",
        json!({ "absolute_path": "/tmp/migrate-repo", "display_name": "migrate-repo" }),
    )
    .await;
    let repo_id = body["data"]["id"].as_str().unwrap().to_string();

    let repo_dir = tempfile::tempdir().unwrap();
    let docs_dir = repo_dir.path().join("docs");
    std::fs::create_dir_all(&docs_dir).unwrap();
    std::fs::write(
        docs_dir.join("SPEC.md"),
        "## SD\n- [ ] [P1] Ship the feature #backend\n- [x] Already wired up the config\n",
    )
    .unwrap();

    let (status, body) = send(
        &router,
        "POST",
        "/api/migration",
        json!({
            "repo_id": repo_id,
            "repo_path": repo_dir.path().to_string_lossy(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items_imported"], 2);
    assert_eq!(body["data"]["items_updated"], 0);

    let (status, body) = send(
        &router,
        "GET",
        &format!("/api/items?repo_id={repo_id}"),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let items = body["data"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().any(|i| i["status"] == "done"));
}

#[tokio::test]
async fn deployment_clone_shares_state_across_handlers() {
    let deployment = LocalDeployment::open_in_memory().await.unwrap();
    let input = CreateRepository {
        absolute_path: "/tmp/shared".into(),
        display_name: "shared".into(),
        default_branch: None,
    };
    let repo = Repository::create(deployment.pool(), &input).await.unwrap();

    let cloned = deployment.clone();
    let worker = Worker::create(
        cloned.pool(),
        &CreateWorker {
            repo_id: repo.id,
            username: "sam".into(),
            task_id: None,
            task_title: None,
        },
    )
    .await
    .unwrap();

    let found = Worker::find_by_id(deployment.pool(), &worker.id).await.unwrap();
    assert!(found.is_some());
}
