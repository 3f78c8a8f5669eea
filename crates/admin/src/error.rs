// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for the admin API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    Unauthorized,
    LoggedInElsewhere,
    WrongDevice,
    BadRequest,
    OrgLocked,
    FlowNotFound,
    LoginFailed,
    AgentError,
    UpgradeInProgress,
    Internal,
}

impl ApiError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::LoggedInElsewhere => 401,
            Self::WrongDevice => 401,
            Self::BadRequest => 400,
            Self::OrgLocked => 409,
            Self::FlowNotFound => 404,
            Self::LoginFailed => 502,
            Self::AgentError => 502,
            Self::UpgradeInProgress => 409,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::LoggedInElsewhere => "LOGGED_IN_ELSEWHERE",
            Self::WrongDevice => "WRONG_DEVICE",
            Self::BadRequest => "BAD_REQUEST",
            Self::OrgLocked => "ORG_LOCKED",
            Self::FlowNotFound => "FLOW_NOT_FOUND",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::AgentError => "AGENT_ERROR",
            Self::UpgradeInProgress => "UPGRADE_IN_PROGRESS",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }

    /// Shorthand for handlers returning `Result<_, Response>`.
    pub fn respond(&self, message: impl Into<String>) -> Response {
        self.to_http_response(message).into_response()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
