//! envgridd — the envgrid daemon.
//!
//! Single binary that assembles the control plane:
//! - Workload runtime (docker compose or kubectl)
//! - Deployment orchestrator + metadata cache
//! - Expiry and folder reclamation schedulers
//! - Network attachment, request forwarding, command sandbox
//! - REST API
//!
//! # Usage
//!
//! ```text
//! envgridd --config /etc/envgrid/envgrid.toml --port 8787
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use envgrid_api::ApiState;
use envgrid_core::EnvgridConfig;
use envgrid_deployer::Orchestrator;
use envgrid_proxy::{NetworkAttachment, RequestForwarder};
use envgrid_reaper::{ExpiryReaper, FolderReclaimer};
use envgrid_runtime::{Runtime, TokioProcessRunner, WorkloadRuntime};
use envgrid_sandbox::CommandSandbox;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "envgridd", about = "envgrid ephemeral deployment daemon")]
struct Cli {
    /// TOML configuration file. Every setting has a default.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on.
    #[arg(long, default_value = "8787")]
    port: u16,

    /// Override `deployments_dir` from the config file.
    #[arg(long)]
    deployments_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,envgridd=debug,envgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<EnvgridConfig> {
    let mut config = match &cli.config {
        Some(path) => EnvgridConfig::from_file(path)?,
        None => EnvgridConfig::default(),
    };
    if let Some(dir) = &cli.deployments_dir {
        config.deployments_dir = dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli)?;
    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }
    run(config, cli.port).await
}

async fn run(config: EnvgridConfig, port: u16) -> anyhow::Result<()> {
    info!(runtime = ?config.runtime, "envgrid daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let runner = Arc::new(TokioProcessRunner);
    let runtime = Arc::new(Runtime::from_kind(config.runtime, runner.clone()));
    if !runtime.ping().await {
        warn!(runtime = ?config.runtime, "runtime not reachable yet, starts will be rejected until it is");
    }

    let orchestrator = Arc::new(Orchestrator::from_config(runtime.clone(), &config));
    orchestrator.filesystem().ensure_root().await?;
    info!(path = %config.deployments_dir.display(), "deployments root ready");

    let network = Arc::new(NetworkAttachment::new(
        runner.clone(),
        config.network_fragment.clone(),
    ));
    let forwarder = Arc::new(RequestForwarder::new(
        runtime.clone(),
        config.forward_timeout(),
        config.forward_default_port,
    ));
    let sandbox = CommandSandbox::with_capacity(runner, config.command_runs_capacity);

    // ── Start background tasks ─────────────────────────────────

    let expiry = Arc::new(ExpiryReaper::new(orchestrator.clone(), config.expire_after()))
        .spawn(config.expiry_interval());
    let reclaim = Arc::new(FolderReclaimer::new(
        orchestrator.clone(),
        config.delete_period(),
    ))
    .spawn(config.reclaim_interval());

    // ── Start API server ───────────────────────────────────────

    let router = envgrid_api::build_router(ApiState {
        orchestrator,
        network,
        forwarder,
        sandbox,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c, shutting down");
            }
            info!("shutdown signal received");
        })
        .await?;

    expiry.stop().await;
    reclaim.stop().await;

    info!("envgrid daemon stopped");
    Ok(())
}
