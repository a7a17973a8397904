// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use wedding_rust_server::{
    api::router,
    config::{AppConfig, LOG_FORMAT_ENV},
    funnel::install_panic_hook,
    state::AppState,
    telemetry,
};

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
    install_panic_hook();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let addr = format!("{}:{}", config.host, config.port);
    let environment = config.environment;

    let state = match AppState::new(config).await {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "Failed to initialize application state");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let sweepers = state.spawn_sweepers(&shutdown);
    let app = router(state);

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(addr = %addr, error = %err, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };
    info!(addr = %addr, environment = ?environment, "Wedding API listening (docs at /docs)");

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await;

    shutdown.cancel();
    for sweeper in sweepers {
        if let Err(err) = sweeper.await {
            warn!(error = %err, "Sweeper task ended abnormally");
        }
    }

    match served {
        Ok(()) => {
            info!("Server stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "Server error");
            ExitCode::FAILURE
        }
    }
}

/// Resolve on Ctrl+C or SIGTERM and cancel `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
