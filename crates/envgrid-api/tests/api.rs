//! Router tests against a scripted container engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use envgrid_api::{ApiState, build_router};
use envgrid_deployer::{AdmissionPolicy, FileTemplateRenderer, Orchestrator, OrchestratorSettings};
use envgrid_proxy::{NetworkAttachment, RequestForwarder};
use envgrid_runtime::DockerCompose;
use envgrid_runtime::testing::FakeEngine;
use envgrid_sandbox::CommandSandbox;
use envgrid_state::{FilesystemStore, MetadataStore};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const TEMPLATE: &str =
    "services:\n  app:\n    image: {{ IMAGE }}\nx-metadata:\n  owner: {{ OWNER }}\n";

struct TestApi {
    _dir: TempDir,
    engine: Arc<FakeEngine>,
    router: Router,
}

fn test_api(max_deployments: usize) -> TestApi {
    let dir = TempDir::new().unwrap();
    let templates = dir.path().join("templates");
    let vars = dir.path().join("vars");
    std::fs::create_dir_all(&templates).unwrap();
    std::fs::create_dir_all(&vars).unwrap();
    std::fs::write(templates.join("docker-compose.yml"), TEMPLATE).unwrap();
    std::fs::write(vars.join("variables.yml"), "IMAGE: busybox\nOWNER: ci\n").unwrap();

    let engine = Arc::new(FakeEngine::new());
    let runtime = Arc::new(DockerCompose::new(engine.clone()));
    let orchestrator = Orchestrator::new(
        runtime.clone(),
        Arc::new(FileTemplateRenderer::new(&templates, &vars)),
        FilesystemStore::new(dir.path().join("deployments")),
        Arc::new(MetadataStore::new(10)),
        AdmissionPolicy {
            max_deployments,
            max_memory_percent: None,
        },
        OrchestratorSettings {
            default_template: "docker-compose.yml".to_string(),
            default_variables: "variables.yml".to_string(),
            discovery_server: None,
            process_variables: HashMap::new(),
            delete_period: Duration::from_secs(3600),
        },
    );

    let state = ApiState {
        orchestrator: Arc::new(orchestrator),
        network: Arc::new(NetworkAttachment::new(engine.clone(), "envgrid")),
        forwarder: Arc::new(RequestForwarder::new(runtime, Duration::from_secs(1), 8080)),
        sandbox: CommandSandbox::new(engine.clone()),
    };
    TestApi {
        _dir: dir,
        engine,
        router: build_router(state),
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_method(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn start(id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/deployments")
        .header("content-type", "application/json");
    if let Some(id) = id {
        builder = builder.header("Deployment-Id", id);
    }
    builder.body(Body::from("{}")).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn ping_reports_runtime() {
    let api = test_api(10);
    let (status, body) = send(&api.router, get("/ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["runtime_available"], true);
}

#[tokio::test]
async fn deployment_lifecycle() {
    let api = test_api(10);

    let (status, body) = send(&api.router, start(Some("ABC"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"], "abc");
    assert_eq!(body["data"]["metadata"]["owner"], "ci");

    let (status, body) = send(&api.router, get("/api/v1/deployments/abc")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["data"].as_array().unwrap().is_empty());

    let (status, body) = send(&api.router, get("/api/v1/deployments")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], "abc");

    let (status, body) = send(&api.router, with_method("DELETE", "/api/v1/deployments/abc")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], serde_json::json!([]));
    assert!(api.engine.projects().is_empty());

    let (status, body) = send(&api.router, get("/api/v1/deployments/abc")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], serde_json::json!([]));
}

#[tokio::test]
async fn generated_id_when_header_absent() {
    let api = test_api(10);
    let (status, body) = send(&api.router, start(None)).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_str().unwrap();
    assert_eq!(id.len(), 32);
}

#[tokio::test]
async fn capacity_rejection_is_429_with_reason() {
    let api = test_api(1);
    let (status, _) = send(&api.router, start(Some("one"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&api.router, start(Some("two"))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "AdmissionRejected");
    assert_eq!(body["data"]["reason"], "capacity_reached");
    assert_eq!(body["data"]["max"], 1);
}

#[tokio::test]
async fn unavailable_runtime_is_503() {
    let api = test_api(10);
    api.engine.set_available(false);
    let (status, body) = send(&api.router, start(None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["data"]["reason"], "runtime_unavailable");
}

#[tokio::test]
async fn duplicate_id_is_conflict() {
    let api = test_api(10);
    send(&api.router, start(Some("dup"))).await;
    let (status, body) = send(&api.router, start(Some("dup"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "DeploymentConflict");
}

#[tokio::test]
async fn raw_manifest_start_and_empty_body() {
    let api = test_api(10);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/deployments/manifest")
        .header("Deployment-Id", "raw")
        .body(Body::from("services:\n  web:\n    image: nginx\n"))
        .unwrap();
    let (status, body) = send(&api.router, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"], "raw");

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/deployments/manifest")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&api.router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "EmptyBody");
}

#[tokio::test]
async fn replay_of_live_deployment_is_conflict() {
    let api = test_api(10);
    send(&api.router, start(Some("live"))).await;
    let (status, body) = send(
        &api.router,
        with_method("POST", "/api/v1/deployments/live/replay"),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "ReplayStillActive");
}

#[tokio::test]
async fn replay_after_engine_loss_restarts() {
    let api = test_api(10);
    send(&api.router, start(Some("gone"))).await;
    api.engine.remove_project("gone");

    let (status, body) = send(
        &api.router,
        with_method("POST", "/api/v1/deployments/gone/replay"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "gone");
    assert_eq!(api.engine.projects(), vec!["gone".to_string()]);
}

#[tokio::test]
async fn invalid_id_is_400() {
    let api = test_api(10);
    let (status, body) = send(&api.router, get("/api/v1/deployments/bad.id")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "InvalidDeploymentId");
}

#[tokio::test]
async fn logs_of_unknown_deployment_is_404() {
    let api = test_api(10);
    let (status, body) = send(&api.router, get("/api/v1/deployments/nobody/logs")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "DeploymentNotFound");
}

#[tokio::test]
async fn archive_returns_gzip_bytes() {
    let api = test_api(10);
    send(&api.router, start(Some("arc"))).await;

    let resp = api
        .router
        .clone()
        .oneshot(get("/api/v1/deployments/arc/archive"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/gzip");
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
}

#[tokio::test]
async fn stop_all_returns_remaining_ids() {
    let api = test_api(10);
    send(&api.router, start(Some("a1"))).await;
    send(&api.router, start(Some("a2"))).await;

    let (status, body) = send(&api.router, with_method("DELETE", "/api/v1/deployments")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], serde_json::json!([]));
    assert!(api.engine.projects().is_empty());
}

#[tokio::test]
async fn network_connect_and_disconnect() {
    let api = test_api(10);
    api.engine.add_network("envgrid_default");

    let uri = "/api/v1/deployments/abc/network/api";
    let (status, body) = send(&api.router, with_method("POST", uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "connected");

    let (_, body) = send(&api.router, with_method("POST", uri)).await;
    assert_eq!(body["data"], "already_connected");

    let (status, body) = send(&api.router, with_method("DELETE", uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "disconnected");
}

#[tokio::test]
async fn network_resolution_failure_is_500() {
    let api = test_api(10);
    let (status, body) = send(
        &api.router,
        with_method("POST", "/api/v1/deployments/abc/network/api"),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "NetworkResolutionFailure");
}

#[tokio::test]
async fn forward_to_missing_container_is_502() {
    let api = test_api(10);
    let (status, body) = send(&api.router, get("/api/v1/deployments/abc/forward/api/health")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "ContainerUnreachable");
}

#[tokio::test]
async fn forward_rejects_bad_port_header() {
    let api = test_api(10);
    let req = Request::builder()
        .uri("/api/v1/deployments/abc/forward/api")
        .header("Forward-Port", "http")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&api.router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "MissingParameter");
}

#[tokio::test]
async fn commands_run_or_are_refused() {
    let api = test_api(10);

    let (status, body) = send(
        &api.router,
        post_json("/api/v1/commands", serde_json::json!({"commands": ["echo hi"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["finished"], true);
    assert_eq!(body["data"]["commands"]["echo hi"]["details"]["out"], "hi\n");

    let before = api.engine.calls().len();
    let (status, body) = send(
        &api.router,
        post_json(
            "/api/v1/commands",
            serde_json::json!({"commands": ["rm -rf /x", "ls -l"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "CommandNotAllowed");
    assert!(body["error"].as_str().unwrap().contains("rm -rf /x"));
    assert_eq!(api.engine.calls().len(), before);
}

#[tokio::test]
async fn empty_command_list_is_400() {
    let api = test_api(10);
    let (status, body) = send(
        &api.router,
        post_json("/api/v1/commands", serde_json::json!({"commands": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "MissingParameter");
}

#[tokio::test]
async fn background_run_is_polled_by_id() {
    let api = test_api(10);
    let (status, body) = send(
        &api.router,
        post_json("/api/v1/commands/runs", serde_json::json!({"commands": ["echo bg"]})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = body["data"]["run_id"].as_str().unwrap().to_string();

    let uri = format!("/api/v1/commands/runs/{run_id}");
    let mut finished = Value::Null;
    for _ in 0..100 {
        let (status, body) = send(&api.router, get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        if body["data"]["finished"] == true {
            finished = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(finished["data"]["commands"]["echo bg"]["details"]["out"], "bg\n");

    let (status, body) = send(&api.router, get("/api/v1/commands/runs/unknown")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "CommandRunNotFound");
}

#[tokio::test]
async fn background_run_is_screened() {
    let api = test_api(10);
    let (status, body) = send(
        &api.router,
        post_json(
            "/api/v1/commands/runs",
            serde_json::json!({"commands": ["unlink /etc/passwd"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "CommandNotAllowed");
    assert!(api.engine.calls().is_empty());
}

#[tokio::test]
async fn detached_command_returns_pid() {
    let api = test_api(10);
    let (status, body) = send(
        &api.router,
        post_json("/api/v1/commands/detached", serde_json::json!({"command": "sleep 30"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pid"], 4242);
    assert_eq!(api.engine.calls_matching("detached: sleep 30"), 1);

    let (status, body) = send(
        &api.router,
        post_json("/api/v1/commands/detached", serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "MissingParameter");
}

#[tokio::test]
async fn foreign_compose_projects_survive_stop_all() {
    let api = test_api(1);
    api.engine.add_project("prod-db");

    let (status, _) = send(&api.router, start(Some("mine"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&api.router, with_method("DELETE", "/api/v1/deployments")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], serde_json::json!([]));
    assert_eq!(api.engine.projects(), vec!["prod-db".to_string()]);
}
