use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lesezeichen::config::{Cli, Config, default_config_dir, default_config_path};
use lesezeichen::db::Database;
use lesezeichen::handler::AppState;
use lesezeichen::routes::routes;
use lesezeichen::sync::SyncEngine;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // With --config, data (the database) lives next to the config file;
    // otherwise both go under ~/.lesezeichen/
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("lesezeichen.svc starting");

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let db = Arc::new(Database::new(&cfg.app, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    }));

    let cancellation_token = CancellationToken::new();

    let replica_task = if db.is_replica() {
        let sync_db = db.clone();
        let sync_token = cancellation_token.clone();
        let every = Duration::from_secs(cfg.app.sync_interval_seconds.max(1));
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = sync_db.sync().await {
                            tracing::warn!("Failed to sync replica: {}", e);
                        }
                    }
                    _ = sync_token.cancelled() => {
                        tracing::info!("Replica sync task shutting down");
                        break;
                    }
                }
            }
        }))
    } else {
        None
    };

    let app = routes(AppState {
        engine: SyncEngine::new(db.clone()),
        info: Arc::new(cfg.info.clone()),
    });

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("lesezeichen.svc running on {}", &address);
    let shutdown = cancellation_token.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await;
    if let Err(err) = served {
        tracing::error!(error = %err, "server error");
        cancellation_token.cancel();
    }

    if let Some(task) = replica_task {
        let _ = task.await;
    }
    if let Err(e) = db.close().await {
        tracing::warn!(error = %e, "failed to close database cleanly");
    }
    tracing::info!("lesezeichen.svc going off, graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install ctrl+c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
        },
        _ = terminate => {
            tracing::info!("SIGTERM received, preparing to shutdown");
        },
    }
}
