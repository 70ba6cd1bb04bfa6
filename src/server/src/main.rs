//! HTTP front-end for image rewrites.
//!
//! Exposes the rewrite operations over JSON: request bodies are the
//! same option structs the CLI fills from flags, and one runtime handle
//! (and thus one lease) is shared across requests.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use image_manip_core::options::{
    RebaseOptions, RemoveOptions, RootOptions, SquashOptions, DEFAULT_CONTAINERD_ADDRESS,
    DEFAULT_LOG_LEVEL, DEFAULT_NAMESPACE,
};
use image_manip_runtime::Runtime;

/// Image rewrite server.
#[derive(Parser)]
#[command(name = "image-manip-server", version, about)]
struct ServerArgs {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// containerd address
    #[arg(long, default_value = DEFAULT_CONTAINERD_ADDRESS)]
    containerd_address: String,

    /// containerd namespace
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Snapshotter name (defaults to the host's)
    #[arg(long)]
    snapshotter: Option<String>,

    /// Log level
    #[arg(long, default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,
}

#[derive(Clone)]
struct AppState {
    runtime: Arc<Runtime>,
}

#[derive(Serialize)]
struct OpResponse {
    status: &'static str,
    message: String,
    time: String,
}

impl OpResponse {
    fn success(message: String, start: Instant) -> (StatusCode, Json<OpResponse>) {
        (
            StatusCode::OK,
            Json(OpResponse {
                status: "success",
                message,
                time: format!("{:?}", start.elapsed()),
            }),
        )
    }

    fn failed(err: impl std::fmt::Display, start: Instant) -> (StatusCode, Json<OpResponse>) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(OpResponse {
                status: "failed",
                message: err.to_string(),
                time: format!("{:?}", start.elapsed()),
            }),
        )
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn rebase_handler(
    State(state): State<AppState>,
    Json(opts): Json<RebaseOptions>,
) -> (StatusCode, Json<OpResponse>) {
    let start = Instant::now();
    match state.runtime.rebase(&opts).await {
        Ok(desc) => OpResponse::success(
            format!("rebased {} to {}", opts.image, desc.digest),
            start,
        ),
        Err(err) => OpResponse::failed(err, start),
    }
}

async fn squash_handler(
    State(state): State<AppState>,
    Json(opts): Json<SquashOptions>,
) -> (StatusCode, Json<OpResponse>) {
    let start = Instant::now();
    match state.runtime.squash(&opts).await {
        Ok(desc) => OpResponse::success(
            format!("squashed {} to {}", opts.image, desc.digest),
            start,
        ),
        Err(err) => OpResponse::failed(err, start),
    }
}

async fn remove_handler(
    State(state): State<AppState>,
    Json(opts): Json<RemoveOptions>,
) -> (StatusCode, Json<OpResponse>) {
    let start = Instant::now();
    match state.runtime.remove(&opts).await {
        Ok(desc) => OpResponse::success(
            format!("removed {} from {}, new manifest {}", opts.file, opts.image, desc.digest),
            start,
        ),
        Err(err) => OpResponse::failed(err, start),
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/rebase", post(rebase_handler))
        .route("/squash", post(squash_handler))
        .route("/remove", post(remove_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    let runtime = Runtime::open(&RootOptions {
        containerd_address: args.containerd_address.clone(),
        namespace: args.namespace.clone(),
        snapshotter: args.snapshotter.clone(),
        log_level: args.log_level.clone(),
    })
    .await
    .context("failed to open runtime")?;
    let runtime = Arc::new(runtime);

    let app = router(AppState {
        runtime: runtime.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!(listen = %args.listen, "server starting");

    let shutdown_runtime = runtime.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_runtime.cancel_token().cancel();
        })
        .await
        .context("server error")?;

    runtime.close().await.context("failed to close runtime")?;
    Ok(())
}
