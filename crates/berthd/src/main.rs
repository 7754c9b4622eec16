//! Berth daemon - per-node deployment agent
//!
//! Accepts deployment commands over HTTP and drives the local container
//! engine, the reverse-proxy label surface and the per-application
//! document database. All durable state lives in those systems; the
//! daemon itself only owns its rotated log files.

use std::sync::Arc;

use anyhow::{Context, Result};
use berth_core::Config;
use berth_db::MongoStore;
use berth_deploy::{DeployGuard, Orchestrator, Reconciler};
use berth_engine::Engine;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod heartbeat;
mod routes;

use heartbeat::Heartbeat;
use routes::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cfg = Arc::new(Config::from_env().context("loading configuration")?);

    // Console plus daily-rolling file logs
    std::fs::create_dir_all(&cfg.log_dir)
        .with_context(|| format!("creating log dir {}", cfg.log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&cfg.log_dir, "agent.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "berthd=info,berth_deploy=info,berth_engine=info,berth_db=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    info!(
        dialect = cfg.dialect.as_str(),
        node = %cfg.node_name,
        "berth agent starting"
    );

    let engine = Arc::new(Engine::from_config(&cfg));

    let store = match &cfg.mongo {
        Some(mongo_cfg) => match MongoStore::connect(mongo_cfg.clone()).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "document database unavailable, database features disabled");
                None
            }
        },
        None => None,
    };

    if !cfg.guard_enabled {
        warn!("deploy guard disabled, concurrent deploys of one app may interleave");
    }
    let guard = Arc::new(DeployGuard::new(cfg.guard_enabled));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&cfg),
        Arc::clone(&engine),
        guard,
        store.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(Arc::clone(&engine), store.clone()));

    let heartbeat = Arc::new(Heartbeat::new(Arc::clone(&cfg), Arc::clone(&engine)));
    heartbeat.spawn_loop();

    let state = AppState {
        cfg: Arc::clone(&cfg),
        orchestrator,
        reconciler,
        store,
        heartbeat,
    };
    let app = routes::router(state);

    let addr = format!("{}:{}", cfg.agent_host, cfg.agent_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "agent listening");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        result = async { axum::serve(listener, app).await } => {
            if let Err(e) = result {
                error!("server error: {e}");
                return Err(e.into());
            }
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down");
        }
    }

    info!("agent shutdown complete");
    Ok(())
}
