// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;

use super::{cookies, Session};
use crate::error::ApiError;
use crate::state::AdminState;
use crate::token::TokenClaims;

/// Why a session is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeReason {
    /// The token was refreshed by a login from another browser.
    LoggedInElsewhere,
    /// The token is bound to another browser.
    WrongDevice,
}

impl RevokeReason {
    pub fn error(&self) -> ApiError {
        match self {
            Self::LoggedInElsewhere => ApiError::LoggedInElsewhere,
            Self::WrongDevice => ApiError::WrongDevice,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::LoggedInElsewhere => "You were logged in elsewhere",
            Self::WrongDevice => "Log in on this device",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    Allow,
    Revoke(RevokeReason),
}

/// Decide whether `session` is still valid against the authoritative claims
/// and the request's device cookie.
pub fn check(session: &Session, claims: Option<&TokenClaims>, device_cookie: Option<&str>) -> GuardVerdict {
    if !session.sso_complete {
        return GuardVerdict::Allow;
    }
    let Some(claims) = claims else {
        return GuardVerdict::Allow;
    };
    if claims.iat != session.remembered_issued_at {
        return GuardVerdict::Revoke(RevokeReason::LoggedInElsewhere);
    }
    if claims.device_id.as_deref() != device_cookie {
        return GuardVerdict::Revoke(RevokeReason::WrongDevice);
    }
    GuardVerdict::Allow
}

/// Axum middleware guarding every authenticated route.
///
/// On success the [`Session`] is inserted into request extensions.
pub async fn session_guard(
    State(state): State<Arc<AdminState>>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let session = match cookies::session_id(&jar) {
        Some(id) => state.sessions.get(&id).await,
        None => None,
    };
    let Some(session) = session else {
        return ApiError::Unauthorized.respond("login required");
    };

    // Fail open: an unreadable claims file never locks the operator out.
    let claims = match state.tokens.read_claims() {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(err = %e, "claims unreadable, skipping session checks");
            None
        }
    };
    let device = cookies::device_id(&jar);

    match check(&session, claims.as_ref(), device.as_deref()) {
        GuardVerdict::Allow => {
            req.extensions_mut().insert(session);
            next.run(req).await
        }
        GuardVerdict::Revoke(reason) => {
            state.sessions.remove(&session.id).await;
            tracing::info!(user = %session.user, ?reason, "session revoked");
            let jar = jar.remove(cookies::clear_session_cookie());
            (jar, reason.error().to_http_response(reason.message())).into_response()
        }
    }
}

#[cfg(test)]
#[path = "guard_tests.rs"]
mod tests;
