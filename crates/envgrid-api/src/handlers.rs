//! REST API handlers.
//!
//! Each handler calls one core operation and returns a JSON envelope.

use std::collections::HashMap;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use envgrid_core::{EnvgridError, ErrorKind, ManifestSource, Rejection, StartRequest};
use envgrid_proxy::ForwardRequest;
use envgrid_runtime::{ProcessRunner, WorkloadRuntime};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{ApiState, DEPLOYMENT_ID_HEADER, FORWARD_PORT_HEADER};

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        })
    }
}

/// HTTP status for an engine error.
pub fn status_for(err: &EnvgridError) -> StatusCode {
    match err {
        EnvgridError::AdmissionRejected(Rejection::CapacityReached { .. }) => {
            StatusCode::TOO_MANY_REQUESTS
        }
        EnvgridError::AdmissionRejected(_) => StatusCode::SERVICE_UNAVAILABLE,
        EnvgridError::RenderFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EnvgridError::DeploymentConflict(_) | EnvgridError::ReplayStillActive(_) => {
            StatusCode::CONFLICT
        }
        EnvgridError::CommandRunLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
        EnvgridError::DeploymentNotFound(_) | EnvgridError::CommandRunNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        EnvgridError::InvalidDeploymentId(_)
        | EnvgridError::MissingParameter(_)
        | EnvgridError::EmptyBody => StatusCode::BAD_REQUEST,
        EnvgridError::CommandNotAllowed(_) => StatusCode::FORBIDDEN,
        EnvgridError::ContainerUnreachable { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: EnvgridError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(kind = ?err.kind(), error = %err, "request failed");
    } else {
        debug!(kind = ?err.kind(), error = %err, "request rejected");
    }
    // Rejections carry their reason as data so callers can back off.
    let data = match &err {
        EnvgridError::AdmissionRejected(rejection) => serde_json::to_value(rejection).ok(),
        _ => None,
    };
    (
        status,
        Json(ApiResponse {
            success: false,
            data,
            error: Some(err.to_string()),
            kind: Some(err.kind()),
        }),
    )
        .into_response()
}

fn respond<T: serde::Serialize>(result: Result<T, EnvgridError>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => error_response(e),
    }
}

fn requested_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(DEPLOYMENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_json<T: serde::de::DeserializeOwned + Default>(body: &Bytes) -> Result<T, EnvgridError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| EnvgridError::MissingParameter(format!("malformed JSON body: {e}")))
}

// ── Health ─────────────────────────────────────────────────────

/// GET /ping
pub async fn ping<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
) -> impl IntoResponse {
    let runtime = state.orchestrator.runtime();
    ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "runtime": runtime.kind(),
        "runtime_available": runtime.ping().await,
    }))
}

// ── Deployments ────────────────────────────────────────────────

/// Template start request body. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartBody {
    pub template: Option<String>,
    pub variables: Option<String>,
    pub overrides: HashMap<String, String>,
}

/// GET /api/v1/deployments
pub async fn list_deployments<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
) -> Response {
    respond(state.orchestrator.list().await)
}

/// POST /api/v1/deployments
pub async fn start_from_template<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: StartBody = match parse_json(&body) {
        Ok(body) => body,
        Err(e) => return error_response(e),
    };
    let request = StartRequest {
        source: ManifestSource::Template {
            template: body.template,
            variables: body.variables,
        },
        overrides: body.overrides,
        requested_id: requested_id(&headers),
    };
    match state.orchestrator.start(request).await {
        Ok(started) => (StatusCode::CREATED, ApiResponse::ok(started)).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/v1/deployments/manifest
pub async fn start_from_manifest<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let manifest = match String::from_utf8(body.to_vec()) {
        Ok(text) => text,
        Err(_) => {
            return error_response(EnvgridError::MissingParameter(
                "manifest body is not UTF-8".to_string(),
            ));
        }
    };
    let request = StartRequest {
        source: ManifestSource::Raw(manifest),
        overrides: HashMap::new(),
        requested_id: requested_id(&headers),
    };
    match state.orchestrator.start(request).await {
        Ok(started) => (StatusCode::CREATED, ApiResponse::ok(started)).into_response(),
        Err(e) => error_response(e),
    }
}

/// DELETE /api/v1/deployments
pub async fn stop_all<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
) -> Response {
    respond(state.orchestrator.stop_all().await)
}

/// GET /api/v1/deployments/{id}
pub async fn deployment_status<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    Path(id): Path<String>,
) -> Response {
    respond(state.orchestrator.status(&id).await)
}

/// DELETE /api/v1/deployments/{id}
pub async fn stop_deployment<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    Path(id): Path<String>,
) -> Response {
    respond(state.orchestrator.stop(&id).await)
}

/// POST /api/v1/deployments/{id}/replay
pub async fn replay_deployment<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    Path(id): Path<String>,
) -> Response {
    respond(state.orchestrator.replay(&id).await)
}

/// GET /api/v1/deployments/{id}/logs
pub async fn deployment_logs<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    Path(id): Path<String>,
) -> Response {
    respond(state.orchestrator.logs(&id).await)
}

/// GET /api/v1/deployments/{id}/archive
pub async fn archive_deployment<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    Path(id): Path<String>,
) -> Response {
    let path = match state.orchestrator.archive(&id).await {
        Ok(path) => path,
        Err(e) => return error_response(e),
    };
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => return error_response(EnvgridError::Io(e)),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "deployment.tar.gz".to_string());
    (
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}

// ── Network ────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct NetworkQuery {
    pub network: Option<String>,
}

/// POST /api/v1/deployments/{id}/network/{service}
pub async fn connect_network<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    Path((id, service)): Path<(String, String)>,
    Query(query): Query<NetworkQuery>,
) -> Response {
    respond(
        state
            .network
            .connect(&id, &service, query.network.as_deref())
            .await,
    )
}

/// DELETE /api/v1/deployments/{id}/network/{service}
pub async fn disconnect_network<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    Path((id, service)): Path<(String, String)>,
    Query(query): Query<NetworkQuery>,
) -> Response {
    respond(
        state
            .network
            .disconnect(&id, &service, query.network.as_deref())
            .await,
    )
}

// ── Forwarding ─────────────────────────────────────────────────

/// ANY /api/v1/deployments/{id}/forward/{service}
pub async fn forward_root<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    Path((id, service)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward(&state, &id, &service, "", method, &uri, headers, body).await
}

/// ANY /api/v1/deployments/{id}/forward/{service}/{*path}
pub async fn forward_request<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    Path((id, service, path)): Path<(String, String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward(&state, &id, &service, &path, method, &uri, headers, body).await
}

#[allow(clippy::too_many_arguments)]
async fn forward<R: WorkloadRuntime, P: ProcessRunner>(
    state: &ApiState<R, P>,
    id: &str,
    service: &str,
    path: &str,
    method: Method,
    uri: &Uri,
    mut headers: HeaderMap,
    body: Bytes,
) -> Response {
    let port = match headers.remove(FORWARD_PORT_HEADER) {
        None => None,
        Some(value) => match value.to_str().ok().and_then(|v| v.trim().parse::<u16>().ok()) {
            Some(port) => Some(port),
            None => {
                return error_response(EnvgridError::MissingParameter(format!(
                    "{FORWARD_PORT_HEADER} must be a port number"
                )));
            }
        },
    };
    let path_and_query = match uri.query() {
        Some(query) => format!("/{}?{query}", path.trim_start_matches('/')),
        None => format!("/{}", path.trim_start_matches('/')),
    };
    let request = ForwardRequest {
        method,
        path_and_query,
        headers,
        body,
    };

    match state.forwarder.forward(id, service, port, request).await {
        Ok(upstream) => {
            let mut response = Response::new(Body::from(upstream.body));
            *response.status_mut() = upstream.status;
            for (name, value) in upstream.headers.iter() {
                if *name != header::CONNECTION
                    && *name != header::TRANSFER_ENCODING
                    && *name != header::CONTENT_LENGTH
                {
                    response.headers_mut().append(name, value.clone());
                }
            }
            response
        }
        Err(e) => error_response(e),
    }
}

// ── Commands ───────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CommandsBody {
    pub commands: Vec<String>,
}

/// POST /api/v1/commands
pub async fn run_commands<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    body: Bytes,
) -> Response {
    let body: CommandsBody = match parse_json(&body) {
        Ok(body) => body,
        Err(e) => return error_response(e),
    };
    respond(state.sandbox.run(body.commands).await)
}

/// POST /api/v1/commands/runs
pub async fn start_command_run<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    body: Bytes,
) -> Response {
    let body: CommandsBody = match parse_json(&body) {
        Ok(body) => body,
        Err(e) => return error_response(e),
    };
    match state.sandbox.spawn(body.commands).await {
        Ok(run_id) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(serde_json::json!({ "run_id": run_id })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/commands/runs/{run_id}
pub async fn command_run<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    Path(run_id): Path<String>,
) -> Response {
    respond(state.sandbox.record(&run_id).await)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DetachedBody {
    pub command: String,
}

/// POST /api/v1/commands/detached
pub async fn launch_detached<R: WorkloadRuntime, P: ProcessRunner>(
    State(state): State<ApiState<R, P>>,
    body: Bytes,
) -> Response {
    let body: DetachedBody = match parse_json(&body) {
        Ok(body) => body,
        Err(e) => return error_response(e),
    };
    respond(
        state
            .sandbox
            .launch(&body.command)
            .await
            .map(|pid| serde_json::json!({ "pid": pid })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_map_to_distinct_statuses() {
        assert_eq!(
            status_for(&EnvgridError::AdmissionRejected(Rejection::CapacityReached { max: 1 })),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&EnvgridError::AdmissionRejected(Rejection::RuntimeUnavailable)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&EnvgridError::CommandNotAllowed("rm x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&EnvgridError::CommandRunLimit { max: 4 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&EnvgridError::CommandRunNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&EnvgridError::stop_failed("abc", "exit 1", None)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn deployment_id_header_is_trimmed_and_optional() {
        let mut headers = HeaderMap::new();
        assert_eq!(requested_id(&headers), None);
        headers.insert(DEPLOYMENT_ID_HEADER, "  ABC ".parse().unwrap());
        assert_eq!(requested_id(&headers), Some("ABC".to_string()));
        headers.insert(DEPLOYMENT_ID_HEADER, " ".parse().unwrap());
        assert_eq!(requested_id(&headers), None);
    }

    #[test]
    fn blank_json_body_is_default() {
        let body: StartBody = parse_json(&Bytes::from_static(b"  \n")).unwrap();
        assert!(body.template.is_none() && body.overrides.is_empty());
        assert!(parse_json::<StartBody>(&Bytes::from_static(b"{nope")).is_err());
    }
}
