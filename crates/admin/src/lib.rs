// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gwadmin: local administration console for the gateway appliance, built
//! around the device-identity login of its VPN agent.

pub mod agent;
pub mod config;
pub mod error;
pub mod login;
pub mod org;
pub mod persist;
pub mod service;
pub mod session;
pub mod state;
pub mod test_support;
pub mod token;
pub mod transport;
pub mod version;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::AdminConfig;
use crate::service::{ServiceControl, Systemctl};
use crate::state::AdminState;
use crate::transport::build_router;

/// Run the admin server until SIGINT/SIGTERM.
pub async fn run(config: AdminConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let service: Arc<dyn ServiceControl> = Arc::new(Systemctl::new(config.service.clone()));

    let state = Arc::new(AdminState::new(config, service, shutdown.clone())?);
    spawn_signal_handler(shutdown.clone());

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("gwadmin listening on {addr}");
    axum::serve(listener, router).with_graceful_shutdown(shutdown.clone().cancelled_owned()).await?;

    state.shutdown().await;
    tracing::info!("gwadmin stopped");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut term =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(err = %e, "SIGTERM handler unavailable");
                    let _ = tokio::signal::ctrl_c().await;
                    shutdown.cancel();
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        tracing::info!("shutdown requested");
        shutdown.cancel();
    });
}
