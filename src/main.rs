mod config;
mod core;
mod error;
mod interfaces;
mod logging;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::core::browser::BrowserEngine;
use crate::core::jobs::JobManager;
use crate::core::renderer::Renderer;
use crate::core::sink::HttpIngestSink;
use crate::core::storage::Storage;
use crate::interfaces::web::{build_router, AppState};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("venus-render: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let mut config = Config::from_env();
    apply_flags(&mut config, &std::env::args().collect::<Vec<_>>());
    logging::init(config.browser_debug);
    info!(version = VERSION, "Starting venus-render");

    let storage = Arc::new(Storage::open(&config.sqlite_path)?);
    info!(path = %config.sqlite_path, "Storage ready");

    let engine = Arc::new(BrowserEngine::launch(&config).await?);
    info!(headless = config.browser_headless, "Browser launched");

    let sink = Arc::new(HttpIngestSink::new(config.ingest_api_url.clone()));
    let renderer = Arc::new(Renderer::new(
        engine.clone(),
        storage.clone(),
        sink,
        config.clone(),
    ));

    let shutdown = CancellationToken::new();
    let jobs = Arc::new(JobManager::new(renderer, shutdown.clone()));

    spawn_cleanup_loop(storage.clone(), shutdown.clone());

    let state = AppState {
        storage,
        jobs,
        started_at: Instant::now(),
        version: VERSION,
    };
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown.clone()))
        .await?;

    info!("Shutting down");
    engine.shutdown().await;
    Ok(())
}

/// Flag overrides on top of the environment: --http-port, --db-path,
/// --headless, --debug.
fn apply_flags(config: &mut Config, args: &[String]) {
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--http-port" => {
                if i + 1 < args.len() {
                    match args[i + 1].parse() {
                        Ok(port) => config.http_port = port,
                        Err(_) => warn!("Ignoring invalid --http-port value: {}", args[i + 1]),
                    }
                    i += 1;
                }
            }
            "--db-path" => {
                if i + 1 < args.len() {
                    config.sqlite_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--headless" => {
                if i + 1 < args.len() {
                    match args[i + 1].parse() {
                        Ok(v) => config.browser_headless = v,
                        Err(_) => warn!("Ignoring invalid --headless value: {}", args[i + 1]),
                    }
                    i += 1;
                }
            }
            "--debug" => {
                config.browser_debug = true;
            }
            other => {
                warn!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }
}

/// Periodically purges expired sessions, cookies, and cached records.
/// Failures are logged and the loop keeps going.
fn spawn_cleanup_loop(storage: Arc<Storage>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        ticker.tick().await; // first tick fires immediately
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match storage.cleanup_expired().await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "Expired storage rows cleaned up"),
                        Err(e) => error!("Storage cleanup failed: {}", e),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        return;
    }
    info!("Received ctrl-c, shutting down");
    shutdown.cancel();
}
