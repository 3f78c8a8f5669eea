// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the guarded admin API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use axum_extra::extract::CookieJar;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::auth::org_error_response;
use crate::agent::{check_exit_node_name, ExitNode};
use crate::error::ApiError;
use crate::org::ResetReport;
use crate::session::{cookies, Session};
use crate::state::AdminState;
use crate::token::{decode_claims, TokenClaims};
use crate::version::UpgradeEvent;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub login_flows: usize,
    pub token_present: bool,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub session: Session,
    pub claims: Option<TokenClaims>,
    pub org: String,
    pub token_present: bool,
}

#[derive(Debug, Serialize)]
pub struct OrgResponse {
    pub org: String,
    pub locked: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetOrgRequest {
    pub org: String,
}

#[derive(Debug, Serialize)]
pub struct OrgResetResponse {
    #[serde(flatten)]
    pub report: ResetReport,
    pub token_removed: bool,
}

#[derive(Debug, Deserialize)]
pub struct UploadTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct UploadTokenResponse {
    pub saved: bool,
    /// Decoded claims, when the token carries a readable payload.
    pub claims: Option<TokenClaims>,
    /// Seconds until the token file is erased.
    pub token_erase_in_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ExitNodesResponse {
    pub service_active: bool,
    pub current: Option<String>,
    pub exit_nodes: Vec<ExitNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetExitNodeRequest {
    /// Exit node name; absent, empty or `none` clears the selection.
    #[serde(default)]
    pub exit_node: Option<String>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<AdminState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        login_flows: s.login.registry().len(),
        token_present: s.tokens.token_exists(),
    })
}

/// `GET /api/v1/me`
pub async fn me(
    State(s): State<Arc<AdminState>>,
    Extension(session): Extension<Session>,
) -> impl IntoResponse {
    let claims = s.tokens.read_claims().unwrap_or_else(|e| {
        tracing::warn!(err = %e, "claims unreadable");
        None
    });
    Json(MeResponse { session, claims, org: s.org.get(), token_present: s.tokens.token_exists() })
}

/// `GET /api/v1/org`
pub async fn get_org(State(s): State<Arc<AdminState>>) -> impl IntoResponse {
    let org = s.org.get();
    Json(OrgResponse { locked: !org.is_empty(), org })
}

/// `PUT /api/v1/org`
pub async fn set_org(
    State(s): State<Arc<AdminState>>,
    Json(req): Json<SetOrgRequest>,
) -> Response {
    match s.org.set(&req.org) {
        Ok(()) => {
            let org = s.org.get();
            Json(OrgResponse { locked: !org.is_empty(), org }).into_response()
        }
        Err(e) => org_error_response(&e),
    }
}

/// `DELETE /api/v1/org`: unbind the gateway and drop the token.
pub async fn reset_org(State(s): State<Arc<AdminState>>) -> impl IntoResponse {
    let mut report = s.org.reset().await;
    let token_removed = match s.tokens.remove_token() {
        Ok(removed) => removed,
        Err(e) => {
            report.errors.push(format!("remove token: {e}"));
            false
        }
    };
    Json(OrgResetResponse { report, token_removed })
}

/// `POST /api/v1/token`: store a token supplied by the operator.
///
/// The file is erased on the same schedule as a login's token. When the
/// payload decodes, the claims are bound to the uploading browser and the
/// uploader's session follows the new token.
pub async fn upload_token(
    State(s): State<Arc<AdminState>>,
    Extension(session): Extension<Session>,
    jar: CookieJar,
    Json(req): Json<UploadTokenRequest>,
) -> Response {
    if let Err(e) = s.tokens.write_token(&req.token) {
        let code = if req.token.trim().is_empty() { ApiError::BadRequest } else { ApiError::Internal };
        return code.respond(format!("Failed to save client token: {e:#}"));
    }
    let erase_in = s.eraser.schedule().delay.as_secs();
    tracing::info!(user = %session.user, erase_in, "client token uploaded");

    let claims = match decode_claims(req.token.trim()) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::info!(err = %e, "uploaded token has no readable claims");
            return Json(UploadTokenResponse { saved: true, claims: None, token_erase_in_secs: erase_in })
                .into_response();
        }
    };
    let (jar, device_id) = match cookies::device_id(&jar) {
        Some(id) => (jar, id),
        None => {
            let id = cookies::new_device_id();
            (jar.add(cookies::device_cookie(&id, s.config.secure_cookies)), id)
        }
    };
    let claims = match s.tokens.bind_device(&claims, &device_id) {
        Ok(bound) => bound,
        Err(e) => return ApiError::Internal.respond(format!("failed to persist token claims: {e:#}")),
    };
    s.sessions.remember_issued_at(&session.id, claims.iat).await;
    let body =
        UploadTokenResponse { saved: true, claims: Some(claims), token_erase_in_secs: erase_in };
    (jar, Json(body)).into_response()
}

/// `GET /api/v1/vpn/status`
pub async fn vpn_status(State(s): State<Arc<AdminState>>) -> impl IntoResponse {
    Json(s.service.status().await)
}

/// `POST /api/v1/vpn/restart`
pub async fn vpn_restart(State(s): State<Arc<AdminState>>) -> Response {
    match s.service.restart().await {
        Ok(()) => Json(serde_json::json!({ "restarted": true })).into_response(),
        Err(e) => {
            tracing::warn!(err = %e, "service restart failed");
            ApiError::AgentError.respond(format!("Failed to restart VPN service: {e:#}"))
        }
    }
}

/// `GET /api/v1/vpn/exit-nodes`: the agent is only asked while the service
/// runs.
pub async fn exit_nodes(State(s): State<Arc<AdminState>>) -> impl IntoResponse {
    let status = s.service.status().await;
    if !status.active {
        return Json(ExitNodesResponse {
            service_active: false,
            current: None,
            exit_nodes: Vec::new(),
            error: None,
        });
    }
    match s.agent.state().await {
        Ok(state) => Json(ExitNodesResponse {
            service_active: true,
            current: state.current_exit_node().map(str::to_owned),
            exit_nodes: state.exit_nodes(),
            error: None,
        }),
        Err(e) => {
            tracing::warn!(err = %e, "node state unavailable");
            Json(ExitNodesResponse {
                service_active: true,
                current: None,
                exit_nodes: Vec::new(),
                error: Some(format!("{e:#}")),
            })
        }
    }
}

/// `PUT /api/v1/vpn/exit-node`
pub async fn set_exit_node(
    State(s): State<Arc<AdminState>>,
    Json(req): Json<SetExitNodeRequest>,
) -> Response {
    let selected = req.exit_node.as_deref().map(str::trim).filter(|n| !n.is_empty() && *n != "none");
    if let Some(Err(e)) = selected.map(check_exit_node_name) {
        return ApiError::BadRequest.respond(format!("{e:#}"));
    }
    match s.agent.set_exit_node(selected).await {
        Ok(message) => {
            tracing::info!(exit_node = ?selected, "exit node updated");
            Json(serde_json::json!({ "exit_node": selected, "message": message })).into_response()
        }
        Err(e) => ApiError::AgentError.respond(format!("{e:#}")),
    }
}

/// `GET /api/v1/agent/version`
pub async fn agent_version(State(s): State<Arc<AdminState>>) -> Response {
    match s.version.check().await {
        Ok(check) => Json(check).into_response(),
        Err(e) => {
            tracing::warn!(err = %e, "agent version check failed");
            ApiError::AgentError.respond(format!("Failed to get current agent version: {e:#}"))
        }
    }
}

/// `POST /api/v1/agent/upgrade`: run the upgrade and stream its progress as
/// server-sent events. The upgrade finishes even if the client disconnects.
pub async fn upgrade_agent(State(s): State<Arc<AdminState>>) -> Response {
    let Some(guard) = s.version.try_begin_upgrade() else {
        return ApiError::UpgradeInProgress.respond("An agent upgrade is already running");
    };
    let (tx, rx) = mpsc::channel(32);
    let state = Arc::clone(&s);
    s.tasks.spawn(async move {
        let _guard = guard;
        if let Err(e) = state.version.upgrade(tx.clone()).await {
            tracing::warn!(err = %e, "agent upgrade failed to run");
            let _ = tx.send(UpgradeEvent::Done { success: false, version: None }).await;
        }
    });

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(upgrade_event(&event)), rx))
    });
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

fn upgrade_event(event: &UpgradeEvent) -> Event {
    match event {
        UpgradeEvent::Start => {
            Event::default().event("start").data(serde_json::json!({ "status": "started" }).to_string())
        }
        UpgradeEvent::Progress { percent } => Event::default()
            .event("progress")
            .data(serde_json::json!({ "percent": percent }).to_string()),
        UpgradeEvent::Done { success, version } => {
            let status = if *success { "success" } else { "error" };
            Event::default()
                .event("done")
                .data(serde_json::json!({ "status": status, "version": version }).to_string())
        }
    }
}
