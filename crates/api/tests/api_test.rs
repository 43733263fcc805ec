use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tower::ServiceExt;
use uuid::Uuid;

use archivist_api::{create_app, AppState};
use archivist_core::config::models::ApiConfig;
use archivist_dispatcher::{
    ClusterLockExecutor, CounterAggregator, DispatchService, DispatchServiceTrait, HeartbeatHandler,
    JobService, TaskExpansion,
};
use archivist_domain::entities::TaskState;
use archivist_domain::repositories::TaskRepository;
use archivist_infrastructure::MemoryRepositories;
use archivist_testing_utils::{MockAnalystTransport, RecordingEventPublisher};

const ANALYST: &str = "http://analyst-1:8080";

struct TestApp {
    app: Router,
    state: AppState,
    repos: MemoryRepositories,
}

fn setup() -> TestApp {
    let repos = MemoryRepositories::new();
    let transport = Arc::new(MockAnalystTransport::new());
    let publisher = Arc::new(RecordingEventPublisher::new());
    let lock_executor =
        ClusterLockExecutor::new(repos.cluster_locks.clone(), "api-test", Handle::current(), None);

    let job_service = Arc::new(JobService::new(
        repos.jobs.clone(),
        repos.tasks.clone(),
        repos.task_errors.clone(),
        transport.clone(),
        publisher,
        lock_executor,
        None,
    ));
    let expansion = Arc::new(TaskExpansion::new(
        repos.jobs.clone(),
        repos.tasks.clone(),
        job_service.clone(),
    ));
    let dispatch = Arc::new(DispatchService::new(
        repos.jobs.clone(),
        repos.tasks.clone(),
        repos.analysts.clone(),
        transport,
        job_service.clone(),
        expansion.clone(),
        CounterAggregator::new(repos.tasks.clone(), repos.jobs.clone()),
        None,
    ));
    let heartbeat = Arc::new(HeartbeatHandler::new(
        repos.analysts.clone(),
        repos.tasks.clone(),
    ));

    let state = AppState {
        job_service,
        dispatch,
        expansion,
        heartbeat,
        analyst_repo: repos.analysts.clone(),
        metrics_handle: None,
    };
    let app = create_app(state.clone(), &ApiConfig::default(), "/metrics");

    TestApp { app, state, repos }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn job_request(scripts: usize) -> Value {
    let scripts: Vec<Value> = (0..scripts)
        .map(|i| json!({ "name": format!("script-{i}") }))
        .collect();
    json!({
        "project_id": Uuid::new_v4(),
        "user_id": Uuid::new_v4(),
        "user_name": "alice",
        "name": "nightly-import",
        "job_type": "Import",
        "scripts": scripts,
    })
}

fn ping_request(task_id: Option<Uuid>) -> Value {
    json!({
        "endpoint": ANALYST,
        "total_ram_mb": 8192,
        "free_ram_mb": 4096,
        "load": 0.1,
        "version": "1.0.0",
        "task_id": task_id,
    })
}

fn event(task_id: &str, job_id: &str, payload: Value) -> Value {
    json!({
        "task_id": task_id,
        "job_id": job_id,
        "endpoint": ANALYST,
        "event": payload,
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let t = setup();
    let (status, body) = send(&t.app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["pending_tasks"], 0);
}

#[tokio::test]
async fn test_metrics_disabled_without_recorder() {
    let t = setup();
    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_and_get_job() {
    let t = setup();
    let (status, body) = send(&t.app, "POST", "/api/v1/jobs", Some(job_request(3))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["state"], "Active");
    let job_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "nightly-import");
    assert_eq!(body["data"]["counts"]["task_states"]["waiting"], 3);

    let (status, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}/tasks"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (status, body) = send(&t.app, "GET", "/api/v1/jobs?state=Active", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = send(&t.app, "GET", "/api/v1/jobs?state=Finished", None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_job_without_scripts_is_rejected() {
    let t = setup();
    let (status, body) = send(&t.app, "POST", "/api/v1/jobs", Some(job_request(0))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "INVALID_JOB_SPEC");
}

#[tokio::test]
async fn test_unknown_job_returns_404() {
    let t = setup();
    let uri = format!("/api/v1/jobs/{}", Uuid::new_v4());
    let (status, body) = send(&t.app, "GET", &uri, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "JOB_NOT_FOUND");
    assert_eq!(body["error"]["code"], 404);
}

#[tokio::test]
async fn test_ping_registers_analyst() {
    let t = setup();
    let (status, body) = send(&t.app, "POST", "/cluster/_ping", Some(ping_request(None))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["endpoint"], ANALYST);
    assert_eq!(body["data"]["state"], "Up");

    let (_, body) = send(&t.app, "GET", "/api/v1/analysts", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_ping_with_empty_endpoint_is_rejected() {
    let t = setup();
    let mut request = ping_request(None);
    request["endpoint"] = json!("  ");
    let (status, _) = send(&t.app, "POST", "/cluster/_ping", Some(request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_task_lifecycle_through_events() {
    let t = setup();
    let (_, body) = send(&t.app, "POST", "/api/v1/jobs", Some(job_request(1))).await;
    let job_id = body["data"]["id"].as_str().unwrap().to_string();

    send(&t.app, "POST", "/cluster/_ping", Some(ping_request(None))).await;
    let stats = t.state.dispatch.dispatch_tick().await.unwrap();
    assert_eq!(stats.dispatched, 1);

    let (_, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}/tasks"), None).await;
    let task_id = body["data"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"][0]["state"], "Queued");

    let (status, _) = send(
        &t.app,
        "POST",
        "/cluster/_event",
        Some(event(&task_id, &job_id, json!({ "type": "started" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &t.app,
        "POST",
        "/cluster/_event",
        Some(event(
            &task_id,
            &job_id,
            json!({ "type": "progress", "payload": { "progress": 50 } }),
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&t.app, "GET", &format!("/api/v1/tasks/{task_id}"), None).await;
    assert_eq!(body["data"]["state"], "Running");
    assert_eq!(body["data"]["progress"], 50);

    let (status, _) = send(
        &t.app,
        "POST",
        "/cluster/_event",
        Some(event(
            &task_id,
            &job_id,
            json!({ "type": "stats", "payload": { "created": 3, "warnings": 1 } }),
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}"), None).await;
    assert_eq!(body["data"]["counts"]["asset_counters"]["created"], 3);
    assert_eq!(body["data"]["counts"]["asset_counters"]["warnings"], 1);

    let (status, _) = send(
        &t.app,
        "POST",
        "/cluster/_event",
        Some(event(
            &task_id,
            &job_id,
            json!({ "type": "stopped", "payload": { "exit_status": 0 } }),
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}"), None).await;
    assert_eq!(body["data"]["state"], "Finished");
    assert_eq!(body["data"]["counts"]["task_states"]["success"], 1);
}

#[tokio::test]
async fn test_expand_event_creates_task() {
    let t = setup();
    let (_, body) = send(&t.app, "POST", "/api/v1/jobs", Some(job_request(1))).await;
    let job_id = body["data"]["id"].as_str().unwrap().to_string();
    let task_id: Uuid = {
        let (_, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}/tasks"), None).await;
        body["data"][0]["id"].as_str().unwrap().parse().unwrap()
    };

    let tasks = &t.repos.tasks;
    tasks
        .set_state(task_id, TaskState::Queued, Some(TaskState::Waiting))
        .await
        .unwrap();
    tasks.set_host(task_id, Some(ANALYST)).await.unwrap();
    tasks
        .set_state(task_id, TaskState::Running, Some(TaskState::Queued))
        .await
        .unwrap();

    let (status, body) = send(
        &t.app,
        "POST",
        "/cluster/_event",
        Some(event(
            &task_id.to_string(),
            &job_id,
            json!({ "type": "expand", "payload": { "script": { "name": "child" } } }),
        )),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["name"], "child");
    assert_eq!(body["data"]["state"], "Waiting");

    let (_, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}/tasks"), None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_expand_from_waiting_task_conflicts() {
    let t = setup();
    let (_, body) = send(&t.app, "POST", "/api/v1/jobs", Some(job_request(1))).await;
    let job_id = body["data"]["id"].as_str().unwrap().to_string();
    let (_, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}/tasks"), None).await;
    let task_id = body["data"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &t.app,
        "POST",
        "/cluster/_event",
        Some(event(
            &task_id,
            &job_id,
            json!({ "type": "expand", "payload": { "script": { "name": "child" } } }),
        )),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "EXPAND_REJECTED");
}

#[tokio::test]
async fn test_cancel_job_skips_tasks() {
    let t = setup();
    let (_, body) = send(&t.app, "POST", "/api/v1/jobs", Some(job_request(2))).await;
    let job_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&t.app, "PUT", &format!("/api/v1/jobs/{job_id}/_cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);

    let (_, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}"), None).await;
    assert_eq!(body["data"]["state"], "Cancelled");
    assert_eq!(body["data"]["counts"]["task_states"]["skipped"], 2);

    let (status, body) = send(&t.app, "PUT", &format!("/api/v1/jobs/{job_id}/_cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], false);

    let (_, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}/tasks"), None).await;
    let task_id = body["data"][0]["id"].as_str().unwrap().to_string();
    let (status, body) = send(&t.app, "PUT", &format!("/api/v1/tasks/{task_id}/_retry"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "JOB_NOT_ACTIVE");
}

#[tokio::test]
async fn test_pause_and_resume_job() {
    let t = setup();
    let (_, body) = send(&t.app, "POST", "/api/v1/jobs", Some(job_request(1))).await;
    let job_id = body["data"]["id"].as_str().unwrap().to_string();

    let uri = format!("/api/v1/jobs/{job_id}/_pause?duration_seconds=600");
    let (status, body) = send(&t.app, "PUT", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);

    let (_, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}"), None).await;
    assert_eq!(body["data"]["paused"], true);
    assert!(body["data"]["time_pause_expired"].is_string());

    let (status, body) = send(&t.app, "PUT", &format!("/api/v1/jobs/{job_id}/_resume"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);

    let (_, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}"), None).await;
    assert_eq!(body["data"]["paused"], false);

    send(&t.app, "PUT", &format!("/api/v1/jobs/{job_id}/_cancel"), None).await;
    let (status, body) = send(&t.app, "PUT", &format!("/api/v1/jobs/{job_id}/_pause"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "JOB_NOT_ACTIVE");
}

#[tokio::test]
async fn test_skip_and_retry_task() {
    let t = setup();
    let (_, body) = send(&t.app, "POST", "/api/v1/jobs", Some(job_request(2))).await;
    let job_id = body["data"]["id"].as_str().unwrap().to_string();
    let (_, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}/tasks"), None).await;
    let first = body["data"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&t.app, "PUT", &format!("/api/v1/tasks/{first}/_skip"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);

    let (_, body) = send(&t.app, "PUT", &format!("/api/v1/tasks/{first}/_skip"), None).await;
    assert_eq!(body["data"], false);

    let (status, body) = send(&t.app, "PUT", &format!("/api/v1/tasks/{first}/_retry"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);

    let (_, body) = send(&t.app, "GET", &format!("/api/v1/tasks/{first}"), None).await;
    assert_eq!(body["data"]["state"], "Waiting");
}

#[tokio::test]
async fn test_retry_all_failures() {
    let t = setup();
    let (_, body) = send(&t.app, "POST", "/api/v1/jobs", Some(job_request(2))).await;
    let job_id = body["data"]["id"].as_str().unwrap().to_string();
    let (_, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}/tasks"), None).await;
    let task_id: Uuid = body["data"][0]["id"].as_str().unwrap().parse().unwrap();

    t.repos
        .tasks
        .set_state(task_id, TaskState::Failure, None)
        .await
        .unwrap();

    let uri = format!("/api/v1/jobs/{job_id}/_retryAllFailures");
    let (status, body) = send(&t.app, "PUT", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], 1);

    let (_, body) = send(&t.app, "GET", &format!("/api/v1/jobs/{job_id}/errors"), None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_id_is_bad_request() {
    let t = setup();
    let (status, _) = send(&t.app, "GET", "/api/v1/tasks/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
