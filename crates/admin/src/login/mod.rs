// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device-identity login: spawns the agent's `client login`, scrapes the
//! login URL, tracks the process through the login window and watches for
//! the token file.
//!
//! Per flow: `STARTED -> URL_FOUND -> {COMPLETED | EXPIRED | FAILED}`, or
//! `STARTED -> FAILED` when no URL appears before the process exits.

pub mod orchestrator;
pub mod process;
pub mod registry;
pub mod watcher;

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;

pub use orchestrator::LoginOrchestrator;
pub use process::{AgentProcess, FlowProcess, LoginCommand, ProcessStatus};
pub use registry::{LoginFlow, LoginFlowRegistry};

/// Identifier of one login attempt.
///
/// Possession of a flow id is enough to complete the flow, so ids are
/// unguessable: server-generated ids carry 256 random bits and
/// client-supplied ids must be at least 22 characters of base64url.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FlowId(String);

impl FlowId {
    pub const MIN_LEN: usize = 22;
    pub const MAX_LEN: usize = 128;

    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::random();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn parse(raw: &str) -> Result<Self, LoginError> {
        let valid = (Self::MIN_LEN..=Self::MAX_LEN).contains(&raw.len())
            && raw.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if valid {
            Ok(Self(raw.to_owned()))
        } else {
            Err(LoginError::InvalidFlowId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Timing knobs of the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginTimings {
    /// Age after which a registered flow is swept.
    pub flow_ttl: Duration,
    /// Age after which the login process group is terminated.
    pub login_deadline: Duration,
    /// Bound on waiting for the login URL to appear in the agent output.
    pub url_timeout: Duration,
    pub watch_interval: Duration,
    pub watch_attempts: u32,
}

impl Default for LoginTimings {
    fn default() -> Self {
        Self {
            flow_ttl: Duration::from_secs(300),
            login_deadline: Duration::from_secs(120),
            url_timeout: Duration::from_secs(30),
            watch_interval: Duration::from_secs(2),
            watch_attempts: 60,
        }
    }
}

/// A started flow: the browser must visit `login_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginStart {
    pub flow_id: FlowId,
    pub login_url: String,
}

/// Result of polling a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollStatus {
    pub authenticated: bool,
    pub error: Option<String>,
}

impl PollStatus {
    pub fn pending() -> Self {
        Self { authenticated: false, error: None }
    }

    pub fn authenticated() -> Self {
        Self { authenticated: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { authenticated: false, error: Some(error.into()) }
    }
}

/// Background progress of login flows, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoginEvent {
    UrlFound { flow_id: FlowId, pid: Option<u32> },
    TokenAcquired { flow_id: FlowId },
    ServiceRestarted { flow_id: FlowId },
    ServiceRestartFailed { flow_id: FlowId, error: String },
    /// The watcher gave up; the flow expires silently.
    WatchExpired { flow_id: FlowId },
    /// The login deadline terminated the process.
    DeadlineReached { flow_id: FlowId },
    Swept { flow_id: FlowId },
}

/// Why a login could not be started or completed.
#[derive(Debug)]
pub enum LoginError {
    MissingOrg,
    InvalidFlowId,
    /// The agent process could not be started.
    Spawn(std::io::Error),
    /// The agent exited without printing a login URL.
    UrlNotFound { output: String, exit_code: Option<i32> },
    /// No login URL appeared before the read deadline.
    UrlTimeout { output: String, timeout: Duration },
    UnknownFlow,
    /// The flow finished but the token is absent or malformed.
    InvalidToken(String),
}

impl LoginError {
    /// Captured agent output, for operator diagnosis.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::UrlNotFound { output, .. } | Self::UrlTimeout { output, .. } => {
                Some(output.as_str()).filter(|o| !o.is_empty())
            }
            _ => None,
        }
    }
}

impl fmt::Display for LoginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingOrg => f.write_str("Please set the organization name first."),
            Self::InvalidFlowId => f.write_str("invalid login flow id"),
            Self::Spawn(e) => write!(f, "Error running login command: {e}"),
            Self::UrlNotFound { exit_code: Some(code), .. } => {
                write!(f, "Login URL not found in CLI output (exit code {code})")
            }
            Self::UrlNotFound { exit_code: None, .. } => {
                f.write_str("Login URL not found in CLI output")
            }
            Self::UrlTimeout { timeout, .. } => {
                write!(f, "Login URL not printed within {}s", timeout.as_secs())
            }
            Self::UnknownFlow => f.write_str("unknown or expired login flow"),
            Self::InvalidToken(reason) => {
                write!(f, "Authentication failed ({reason}); please start the login again")
            }
        }
    }
}

impl std::error::Error for LoginError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
