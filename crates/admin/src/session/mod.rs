// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-side admin sessions, their cookies, and the per-request guard that
//! ties an SSO session to the current token and to one browser.

pub mod cookies;
pub mod guard;

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::state::epoch_ms;

pub use guard::{check, session_guard, GuardVerdict, RevokeReason};

/// An authenticated admin session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    #[serde(skip)]
    pub id: String,
    pub user: String,
    /// `iat` of the token this session was established against.
    pub remembered_issued_at: Option<i64>,
    /// Established by the device-identity login rather than the password.
    pub sso_complete: bool,
    pub created_at_ms: u64,
}

/// In-memory session table keyed by opaque session id.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for a password login.
    pub async fn create_password(&self, user: &str) -> Session {
        self.insert(user, None, false).await
    }

    /// Create a session for a completed SSO login.
    pub async fn create_sso(&self, user: &str, issued_at: Option<i64>) -> Session {
        self.insert(user, issued_at, true).await
    }

    async fn insert(&self, user: &str, remembered_issued_at: Option<i64>, sso_complete: bool) -> Session {
        let id_bytes: [u8; 32] = rand::random();
        let session = Session {
            id: URL_SAFE_NO_PAD.encode(id_bytes),
            user: user.to_owned(),
            remembered_issued_at,
            sso_complete,
            created_at_ms: epoch_ms(),
        };
        self.sessions.write().await.insert(session.id.clone(), session.clone());
        session
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.write().await.remove(id)
    }

    /// Re-anchor an SSO session to a new token, e.g. after the operator
    /// uploaded one. Password sessions are left alone.
    pub async fn remember_issued_at(&self, id: &str, issued_at: Option<i64>) -> bool {
        match self.sessions.write().await.get_mut(id) {
            Some(session) if session.sso_complete => {
                session.remembered_issued_at = issued_at;
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
