//! Entry point: parses CLI args, loads config, runs migrations, seeds
//! default content, then starts the Job Worker and the HTTP listener side
//! by side — grounded on the teacher's `gateway/src/main.rs` (`Args::parse()`,
//! router construction, `TraceLayer`, `TcpListener::bind`,
//! `signal::ctrl_c()` shutdown), scaled down from its ClickHouse-plus-OTel
//! bootstrap to this engine's Postgres-only one.

mod cli;
mod error;
mod observability;
mod routes;
mod state;

use std::net::SocketAddr;

use axum::http::HeaderValue;
use clap::Parser;
use evalengine_core::config::Config;
use evalengine_core::file_storage::FileStorage;
use evalengine_core::repository::Repository;
use evalengine_runners::{run_seeder, CancelSet, JobWorker};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cli::ServerArgs;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    observability::setup_logs();

    let args = ServerArgs::parse();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let pool = match sqlx::postgres::PgPoolOptions::new().max_connections(10).connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to database");
            std::process::exit(1);
        }
    };

    if let Err(e) = sqlx::migrate!("../../migrations").run(&pool).await {
        tracing::error!(error = %e, "failed to run migrations");
        std::process::exit(1);
    }

    if args.run_migrations {
        tracing::info!("migrations applied, exiting (--run-migrations)");
        return;
    }

    let repository = Repository::new(pool);
    let storage = FileStorage::new(config.clone());

    if !args.skip_seed {
        match run_seeder(&repository).await {
            Ok(report) => {
                tracing::info!(inserted = report.inserted, updated = report.updated, unchanged = report.unchanged, "seed complete");
            }
            Err(e) => tracing::error!(error = %e, "seeding failed"),
        }
    }

    let cancel_set = CancelSet::new();
    let cancel_token = CancellationToken::new();

    let worker = JobWorker::new(repository.clone(), storage.clone(), cancel_set.clone());
    let worker_token = cancel_token.clone();
    let worker_handle = tokio::spawn(worker.run(worker_token));

    let app_state = AppState { repository, storage, cancel_set, config: config.clone() };

    let cors = if config.cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config.cors_origins.iter().filter_map(|origin| origin.parse().ok()).collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
    };

    let router = routes::build_router().layer(TraceLayer::new_for_http()).layer(cors).with_state(app_state);

    let bind_address = args.bind_address.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.api_port)));
    let listener = match tokio::net::TcpListener::bind(bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %bind_address, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(%bind_address, "evalengine server listening");

    if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await {
        tracing::error!(error = %e, "server error");
    }

    cancel_token.cancel();
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "job worker task panicked");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
