//! User email index service.
//!
//! Serves email prefix search from a Redis sorted set and keeps that index in
//! sync with the primary user table.
//!
//! # Environment Variables
//!
//! - `STORAGE_MODE`: `in_memory` (default) | `postgres`
//! - `CACHE_MODE`: `in_memory` (default) | `redis`
//! - `DATABASE_URL`: `PostgreSQL` connection URL (required when `STORAGE_MODE=postgres`)
//! - `REDIS_URL`: Redis connection URL (required when `CACHE_MODE=redis`)
//! - `REDIS_NAMESPACE`: optional prefix for every Redis key
//! - `SYNC_CONSUMER_ID`: per-instance name for in-flight jobs (default: `HOSTNAME`)
//! - `SYNC_MIN_INTERVAL_SECS`, `SYNC_LOCK_TTL_SECS`, `SYNC_TICK_INTERVAL_SECS`,
//!   `SYNC_POLL_TIMEOUT_SECS`: sync timing (see `SyncConfig`)
//! - `RUST_LOG`: Logging level (e.g., `debug`, `info`, `user_sync_index=debug`)
//! - `LOG_FORMAT`: `text` (default) | `json`
//! - `HOST`: Server host address (default: `0.0.0.0`)
//! - `PORT`: Server port (default: `3000`)
//! - `WORKER_THREADS`: Number of tokio worker threads (default: logical CPU count)

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use user_sync_index::api::{self, AppState};
use user_sync_index::domain::SystemClock;
use user_sync_index::infrastructure::BackendFactory;
use user_sync_index::sync::{EmailIndexStore, SyncConfig, SyncWorker, spawn_rebuild_ticker};

/// Result of parsing `WORKER_THREADS` environment variable.
struct WorkerThreadsResult {
    threads: Option<usize>,
    warning_emitted: bool,
}

fn parse_worker_threads() -> WorkerThreadsResult {
    let unset = WorkerThreadsResult {
        threads: None,
        warning_emitted: false,
    };
    let Ok(value) = env::var("WORKER_THREADS") else {
        return unset;
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return unset;
    }

    match trimmed.parse::<usize>() {
        Ok(0) => {
            eprintln!("Warning: WORKER_THREADS=0 is invalid (must be > 0), using default");
            WorkerThreadsResult {
                threads: None,
                warning_emitted: true,
            }
        }
        Ok(threads) => WorkerThreadsResult {
            threads: Some(threads),
            warning_emitted: false,
        },
        Err(error) => {
            eprintln!(
                "Warning: WORKER_THREADS='{trimmed}' is not a valid number ({error}), using default"
            );
            WorkerThreadsResult {
                threads: None,
                warning_emitted: true,
            }
        }
    }
}

fn main() {
    dotenvy::dotenv().ok();

    let result = parse_worker_threads();
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();

    if let Some(threads) = result.threads {
        builder.worker_threads(threads);
        eprintln!("Tokio worker_threads set to: {threads}");
    } else if !result.warning_emitted {
        eprintln!("Tokio worker_threads: using default (logical CPU count)");
    }

    let runtime = builder.build().expect("Failed to create tokio runtime");
    runtime.block_on(async_main());
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "user_sync_index=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn async_main() {
    init_tracing();
    tracing::info!("Starting user email index service");

    let sync_config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "Sync configuration error");
            std::process::exit(1);
        }
    };

    let factory = match BackendFactory::from_env() {
        Ok(factory) => factory,
        Err(error) => {
            tracing::error!(%error, "Backend configuration error");
            std::process::exit(1);
        }
    };

    tracing::info!(
        storage_mode = ?factory.config().storage_mode,
        cache_mode = ?factory.config().cache_mode,
        consumer = factory.config().consumer(),
        min_interval_secs = sync_config.min_interval.as_secs(),
        lock_ttl_secs = sync_config.lock_ttl.as_secs(),
        "Configuration loaded"
    );

    let backends = match factory.create().await {
        Ok(backends) => {
            tracing::info!("Backends initialized successfully");
            backends
        }
        Err(error) => {
            tracing::error!(%error, "Failed to initialize backends");
            std::process::exit(1);
        }
    };

    let application_state = AppState::from_backends(&backends, &sync_config, Arc::new(SystemClock));

    let shutdown = CancellationToken::new();

    let mut worker = SyncWorker::new(
        EmailIndexStore::new(Arc::clone(&backends.index)),
        Arc::clone(&backends.users),
        Arc::clone(&backends.queue),
        sync_config.poll_timeout,
    );
    worker.start();

    let ticker = spawn_rebuild_ticker(
        application_state.scheduler.clone(),
        sync_config.tick_interval,
        shutdown.child_token(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let application = api::router(application_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(3000);

    let address: SocketAddr = match format!("{host}:{port}").parse() {
        Ok(address) => address,
        Err(error) => {
            tracing::error!(%error, "Invalid server address: {}:{}", host, port);
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(address).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, "Failed to bind to address {}", address);
            std::process::exit(1);
        }
    };

    match listener.local_addr() {
        Ok(address) => tracing::info!("Listening on {}", address),
        Err(error) => tracing::warn!(%error, "Could not determine local address"),
    }

    if let Err(error) = axum::serve(listener, application)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(%error, "Server error");
    }

    shutdown.cancel();
    if let Err(error) = ticker.await {
        tracing::warn!(%error, "Rebuild ticker task ended abnormally");
    }
    worker.stop().await;

    tracing::info!(
        completed = worker.stats().completed(),
        failed = worker.stats().failed(),
        "Server shutdown complete"
    );
}

/// Completes on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::warn!(%error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
