// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Login endpoints: local password login, logout and the device-identity
//! SSO handshake (`start` -> `status` polling -> `callback`).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::login::{FlowId, LoginError, PollStatus};
use crate::org::OrgError;
use crate::session::{cookies, Session};
use crate::state::AdminState;
use crate::token::TokenClaims;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PasswordLoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: String,
    pub sso_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SsoStartRequest {
    /// Org to bind and log in to; defaults to the bound org.
    #[serde(default)]
    pub org: Option<String>,
    /// Browser-chosen flow id.
    #[serde(default)]
    pub flow_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SsoStartResponse {
    pub flow_id: FlowId,
    pub login_url: String,
    pub org: String,
}

#[derive(Debug, Deserialize)]
pub struct FlowQuery {
    pub flow_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SsoCallbackRequest {
    pub flow_id: String,
}

#[derive(Debug, Serialize)]
pub struct SsoCallbackResponse {
    pub user: String,
    pub claims: TokenClaims,
    /// Seconds until the token file is erased.
    pub token_erase_in_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
    pub token_removed: bool,
}

// -- Helpers ------------------------------------------------------------------

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Whether the request carries a live admin session.
async fn has_session(state: &AdminState, jar: &CookieJar) -> bool {
    match cookies::session_id(jar) {
        Some(id) => state.sessions.get(&id).await.is_some(),
        None => false,
    }
}

/// Map a login failure to a response. Captured agent output is only shown
/// to callers who are already administrators.
fn login_error_response(err: &LoginError, show_output: bool) -> Response {
    let code = match err {
        LoginError::MissingOrg | LoginError::InvalidFlowId => ApiError::BadRequest,
        LoginError::UnknownFlow => ApiError::FlowNotFound,
        LoginError::Spawn(_) => ApiError::AgentError,
        LoginError::UrlNotFound { .. } | LoginError::UrlTimeout { .. } | LoginError::InvalidToken(_) => {
            ApiError::LoginFailed
        }
    };
    let message = match err.output() {
        Some(output) if show_output => format!("{err}. Output: {output}"),
        _ => err.to_string(),
    };
    code.respond(message)
}

pub(crate) fn org_error_response(err: &OrgError) -> Response {
    let code = match err {
        OrgError::Empty => ApiError::BadRequest,
        OrgError::Locked { .. } => ApiError::OrgLocked,
        OrgError::Persist(_) => ApiError::Internal,
    };
    code.respond(err.to_string())
}

// -- Handlers -----------------------------------------------------------------

/// `POST /auth/login`: local administrator password.
pub async fn password_login(
    State(s): State<Arc<AdminState>>,
    jar: CookieJar,
    Json(req): Json<PasswordLoginRequest>,
) -> Response {
    let user_ok = constant_time_eq(&req.username, &s.config.admin_username);
    let pass_ok = constant_time_eq(&req.password, &s.config.admin_password);
    if !(user_ok && pass_ok) {
        tracing::info!(user = %req.username, "password login rejected");
        return ApiError::Unauthorized.respond("Invalid credentials");
    }
    if let Some(old) = cookies::session_id(&jar) {
        s.sessions.remove(&old).await;
    }
    let session = s.sessions.create_password(&req.username).await;
    tracing::info!(user = %session.user, "password login");
    let jar = jar.add(cookies::session_cookie(&session.id, s.config.secure_cookies));
    (jar, Json(SessionResponse { user: session.user, sso_complete: false })).into_response()
}

/// `POST /auth/logout`: drop the session and the token it relied on.
pub async fn logout(
    State(s): State<Arc<AdminState>>,
    Extension(session): Extension<Session>,
    jar: CookieJar,
) -> Response {
    s.sessions.remove(&session.id).await;
    let token_removed = match s.tokens.remove_token() {
        Ok(removed) => removed,
        Err(e) => {
            tracing::warn!(err = %e, "failed to remove token at logout");
            false
        }
    };
    tracing::info!(user = %session.user, token_removed, "logout");
    let jar = jar.remove(cookies::clear_session_cookie());
    (jar, Json(LogoutResponse { logged_out: true, token_removed })).into_response()
}

/// `POST /auth/sso/start`: spawn the agent login and hand back its URL.
pub async fn sso_start(
    State(s): State<Arc<AdminState>>,
    jar: CookieJar,
    body: Option<Json<SsoStartRequest>>,
) -> Response {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let requested = match req.flow_id.as_deref().map(FlowId::parse).transpose() {
        Ok(id) => id,
        Err(e) => return login_error_response(&e, false),
    };
    let admin = has_session(&s, &jar).await;
    if let Some(ref org) = req.org {
        // Anonymous callers log in to the bound org; only an admin may bind one.
        if !admin && org.trim() != s.org.get() {
            tracing::warn!(org = %org, "anonymous login start tried to choose an org");
            return ApiError::Unauthorized.respond("log in to choose an organization");
        }
        if let Err(e) = s.org.set(org) {
            return org_error_response(&e);
        }
    }
    let org = s.org.get();

    match s.login.start(&org, requested).await {
        Ok(started) => Json(SsoStartResponse {
            flow_id: started.flow_id,
            login_url: started.login_url,
            org,
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(org = %org, err = %e, "login start failed");
            login_error_response(&e, admin)
        }
    }
}

/// `GET /auth/sso/status?flow_id=`: polled by the browser during login.
pub async fn sso_status(
    State(s): State<Arc<AdminState>>,
    Query(q): Query<FlowQuery>,
) -> Json<PollStatus> {
    // A malformed id can never have been registered.
    match FlowId::parse(&q.flow_id) {
        Ok(flow_id) => Json(s.login.poll(&flow_id)),
        Err(_) => Json(PollStatus::pending()),
    }
}

/// `POST /auth/sso/callback`: finish the flow, bind this browser and open
/// an SSO session.
pub async fn sso_callback(
    State(s): State<Arc<AdminState>>,
    jar: CookieJar,
    Json(req): Json<SsoCallbackRequest>,
) -> Response {
    let flow_id = match FlowId::parse(&req.flow_id) {
        Ok(id) => id,
        Err(e) => return login_error_response(&e, false),
    };
    let claims = match s.login.complete(&flow_id) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(flow_id = %flow_id, err = %e, "login callback failed");
            return login_error_response(&e, false);
        }
    };

    let device_id = cookies::new_device_id();
    let claims = match s.tokens.bind_device(&claims, &device_id) {
        Ok(bound) => bound,
        Err(e) => {
            tracing::error!(err = %e, "failed to persist token claims");
            return ApiError::Internal.respond(format!("failed to persist token claims: {e:#}"));
        }
    };
    if let Err(e) = s.org.bind_claims(&claims) {
        tracing::warn!(err = %e, "failed to record organization from login");
    }
    let ticket = s.eraser.schedule();

    if let Some(old) = cookies::session_id(&jar) {
        s.sessions.remove(&old).await;
    }
    let user = claims.subject().unwrap_or("sso").to_owned();
    let session = s.sessions.create_sso(&user, claims.iat).await;
    tracing::info!(flow_id = %flow_id, user = %user, iat = ?claims.iat, "sso session established");

    let secure = s.config.secure_cookies;
    let jar = jar
        .add(cookies::session_cookie(&session.id, secure))
        .add(cookies::device_cookie(&device_id, secure));
    let body = SsoCallbackResponse { user, claims, token_erase_in_secs: ticket.delay.as_secs() };
    (jar, Json(body)).into_response()
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
