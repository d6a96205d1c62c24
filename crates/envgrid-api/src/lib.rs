//! envgrid-api — REST API for envgrid.
//!
//! Thin axum layer over the lifecycle engine: every route maps to one core
//! operation and wraps the outcome in the `{success, data, error, kind}`
//! envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/ping` | Liveness |
//! | GET | `/api/v1/deployments` | List active deployments |
//! | POST | `/api/v1/deployments` | Start from a template |
//! | POST | `/api/v1/deployments/manifest` | Start from a raw manifest body |
//! | DELETE | `/api/v1/deployments` | Stop every deployment |
//! | GET | `/api/v1/deployments/{id}` | Deployment status |
//! | DELETE | `/api/v1/deployments/{id}` | Stop a deployment |
//! | POST | `/api/v1/deployments/{id}/replay` | Restart from the persisted manifest |
//! | GET | `/api/v1/deployments/{id}/logs` | Runtime logs |
//! | GET | `/api/v1/deployments/{id}/archive` | Deployment directory as tar.gz |
//! | POST | `/api/v1/deployments/{id}/network/{service}` | Attach to the control-plane network |
//! | DELETE | `/api/v1/deployments/{id}/network/{service}` | Detach from it |
//! | ANY | `/api/v1/deployments/{id}/forward/{service}/{*path}` | Forward a request |
//! | POST | `/api/v1/commands` | Run shell commands |
//! | POST | `/api/v1/commands/runs` | Run shell commands in the background |
//! | GET | `/api/v1/commands/runs/{run_id}` | Poll a background run |
//! | POST | `/api/v1/commands/detached` | Launch one command detached, returns its pid |
//!
//! A start request may name its deployment with the `Deployment-Id`
//! header; otherwise an id is generated.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{any, get, post};
use envgrid_deployer::Orchestrator;
use envgrid_proxy::{NetworkAttachment, RequestForwarder};
use envgrid_runtime::{ProcessRunner, WorkloadRuntime};
use envgrid_sandbox::CommandSandbox;

/// Header carrying a caller-chosen deployment id.
pub const DEPLOYMENT_ID_HEADER: &str = "deployment-id";

/// Header selecting the target port of a forwarded request.
pub const FORWARD_PORT_HEADER: &str = "forward-port";

/// Shared state for API handlers.
pub struct ApiState<R: WorkloadRuntime, P: ProcessRunner> {
    pub orchestrator: Arc<Orchestrator<R>>,
    pub network: Arc<NetworkAttachment<P>>,
    pub forwarder: Arc<RequestForwarder<R>>,
    pub sandbox: CommandSandbox<P>,
}

impl<R: WorkloadRuntime, P: ProcessRunner> Clone for ApiState<R, P> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            network: self.network.clone(),
            forwarder: self.forwarder.clone(),
            sandbox: self.sandbox.clone(),
        }
    }
}

/// Build the complete API router.
pub fn build_router<R: WorkloadRuntime, P: ProcessRunner>(state: ApiState<R, P>) -> Router {
    use handlers::*;

    let api_routes = Router::new()
        .route(
            "/deployments",
            get(list_deployments::<R, P>)
                .post(start_from_template::<R, P>)
                .delete(stop_all::<R, P>),
        )
        .route("/deployments/manifest", post(start_from_manifest::<R, P>))
        .route(
            "/deployments/{id}",
            get(deployment_status::<R, P>).delete(stop_deployment::<R, P>),
        )
        .route("/deployments/{id}/replay", post(replay_deployment::<R, P>))
        .route("/deployments/{id}/logs", get(deployment_logs::<R, P>))
        .route("/deployments/{id}/archive", get(archive_deployment::<R, P>))
        .route(
            "/deployments/{id}/network/{service}",
            post(connect_network::<R, P>).delete(disconnect_network::<R, P>),
        )
        .route(
            "/deployments/{id}/forward/{service}",
            any(forward_root::<R, P>),
        )
        .route(
            "/deployments/{id}/forward/{service}/{*path}",
            any(forward_request::<R, P>),
        )
        .route("/commands", post(run_commands::<R, P>))
        .route("/commands/runs", post(start_command_run::<R, P>))
        .route("/commands/runs/{run_id}", get(command_run::<R, P>))
        .route("/commands/detached", post(launch_detached::<R, P>))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/ping", get(ping::<R, P>).with_state(state))
}
