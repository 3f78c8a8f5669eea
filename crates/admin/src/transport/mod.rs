// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the admin console.

pub mod auth;
pub mod http;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::session::session_guard;
use crate::state::AdminState;

/// Build the axum `Router` with all admin routes.
pub fn build_router(state: Arc<AdminState>) -> Router {
    let guarded = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/api/v1/me", get(http::me))
        .route("/api/v1/org", get(http::get_org).put(http::set_org).delete(http::reset_org))
        .route("/api/v1/token", post(http::upload_token))
        // VPN service and exit nodes
        .route("/api/v1/vpn/status", get(http::vpn_status))
        .route("/api/v1/vpn/restart", post(http::vpn_restart))
        .route("/api/v1/vpn/exit-nodes", get(http::exit_nodes))
        .route("/api/v1/vpn/exit-node", put(http::set_exit_node))
        // Agent version
        .route("/api/v1/agent/version", get(http::agent_version))
        .route("/api/v1/agent/upgrade", post(http::upgrade_agent))
        .route_layer(middleware::from_fn_with_state(state.clone(), session_guard));

    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Login
        .route("/auth/login", post(auth::password_login))
        .route("/auth/sso/start", post(auth::sso_start))
        .route("/auth/sso/status", get(auth::sso_status))
        .route("/auth/sso/callback", post(auth::sso_callback))
        .merge(guarded)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
