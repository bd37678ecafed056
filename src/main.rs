//! rankfuse-core server bootstrap: configuration, telemetry, the
//! `AppState` wiring, the scheduler tick loop, and the axum HTTP
//! surface (C9).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info};

use rankfuse_core::clock::SHUTDOWN_GRACE;
use rankfuse_core::config::AppConfig;
use rankfuse_core::middleware::{rate_limit_middleware, request_logging, RateLimitConfig, RateLimitLayer};
use rankfuse_core::{api, telemetry, AppState};

const SCHEDULER_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "rankfuse-server")]
#[command(about = "Online scoring and ranking/fusion service")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "RANKFUSE_CONFIG", default_value = "config.toml")]
    config: String,

    /// Address to bind the HTTP listener to.
    #[arg(long, env = "RANKFUSE_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_logging();
    let metrics_handle = telemetry::init_metrics();

    let args = Args::parse();
    let config = AppConfig::load(&args.config).context("failed to load configuration")?;
    info!(path = %args.config, "configuration loaded");

    let state = Arc::new(AppState::new(config));
    state.register_offline_jobs();
    info!("offline jobs registered with the scheduler");

    let scheduler_task = spawn_scheduler_loop(Arc::clone(&state));

    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());
    let metrics_router = Router::new().route("/metrics", get(move || async move { metrics_handle.render() }));

    let app = api::build_router(Arc::clone(&state))
        .layer(axum::middleware::from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(axum::middleware::from_fn(request_logging))
        .merge(metrics_router);

    let addr: SocketAddr = args.addr.parse().context("invalid --addr")?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "rankfuse-core listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state), scheduler_task))
        .await
        .context("server error")?;

    Ok(())
}

/// Ticks the scheduler once a second, draining completed offline-job
/// tasks without blocking the next tick.
fn spawn_scheduler_loop(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SCHEDULER_TICK_INTERVAL);
        let mut jobs = JoinSet::new();
        loop {
            ticker.tick().await;
            let now = state.clock.now();
            state.scheduler.tick(now, &mut jobs);
            while let Some(result) = jobs.try_join_next() {
                if let Err(join_error) = result {
                    error!(error = %join_error, "offline job task panicked");
                }
            }
        }
    })
}

async fn shutdown_signal(state: Arc<AppState>, scheduler_task: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining in-flight offline jobs");
    state.scheduler.begin_shutdown();
    scheduler_task.abort();
    tokio::time::sleep(SHUTDOWN_GRACE).await;
}
