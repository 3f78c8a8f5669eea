// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::persist;
use crate::token::{decode_claims, TokenClaims};

/// State of the token file when a login began. A token only belongs to that
/// login once the file is rewritten after this point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenBaseline {
    modified: Option<SystemTime>,
}

/// The agent's bearer token file and the decoded claims cache next to it.
#[derive(Debug, Clone)]
pub struct TokenStore {
    token_path: PathBuf,
    metadata_path: PathBuf,
}

impl TokenStore {
    pub fn new(token_path: PathBuf, metadata_path: PathBuf) -> Self {
        Self { token_path, metadata_path }
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Whether a token file is present, regardless of whether it decodes.
    pub fn token_exists(&self) -> bool {
        self.token_path.is_file()
    }

    /// Modification time of the token file, `None` when absent.
    pub fn token_modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.token_path).and_then(|m| m.modified()).ok()
    }

    pub fn baseline(&self) -> TokenBaseline {
        TokenBaseline { modified: self.token_modified() }
    }

    /// Whether a token file exists that was written after `baseline`.
    pub fn token_written_since(&self, baseline: TokenBaseline) -> bool {
        match (self.token_modified(), baseline.modified) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(now), Some(before)) => now > before,
        }
    }

    /// Raw token contents, trimmed. `None` when absent, unreadable or empty.
    pub fn read_token(&self) -> Option<String> {
        let raw = match std::fs::read_to_string(&self.token_path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.token_path.display(), err = %e, "token unreadable");
                }
                return None;
            }
        };
        let token = raw.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_owned())
        }
    }

    /// Read and decode the token file. Decode failures read as "no claims"
    /// since the agent may still be writing the file.
    pub fn token_claims(&self) -> Option<TokenClaims> {
        let token = self.read_token()?;
        match decode_claims(&token) {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::debug!(err = %e, "token present but not decodable yet");
                None
            }
        }
    }

    /// Store a token supplied directly by an operator.
    pub fn write_token(&self, token: &str) -> anyhow::Result<()> {
        let token = token.trim();
        if token.is_empty() {
            anyhow::bail!("token cannot be empty");
        }
        persist::write_atomic(&self.token_path, token.as_bytes())
    }

    pub fn remove_token(&self) -> std::io::Result<bool> {
        persist::remove_if_exists(&self.token_path)
    }

    /// Cached claims. `Ok(None)` when no cache exists yet.
    pub fn read_claims(&self) -> anyhow::Result<Option<TokenClaims>> {
        let contents = match std::fs::read_to_string(&self.metadata_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Cached claims if available, else decode the token and cache the result.
    pub fn current_claims(&self) -> Option<TokenClaims> {
        match self.read_claims() {
            Ok(Some(claims)) => return Some(claims),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(err = %e, "claims cache unreadable");
                return None;
            }
        }
        let claims = self.token_claims()?;
        if let Err(e) = self.persist_claims(&claims) {
            tracing::warn!(err = %e, "failed to cache token claims");
        }
        Some(claims)
    }

    /// Overwrite the claims cache.
    pub fn persist_claims(&self, claims: &TokenClaims) -> anyhow::Result<()> {
        persist::save_json(&self.metadata_path, claims)
    }

    /// Record which browser the claims are bound to and persist them.
    pub fn bind_device(&self, claims: &TokenClaims, device_id: &str) -> anyhow::Result<TokenClaims> {
        let mut bound = claims.clone();
        bound.device_id = Some(device_id.to_owned());
        self.persist_claims(&bound)?;
        Ok(bound)
    }

    pub fn remove_claims(&self) -> std::io::Result<bool> {
        persist::remove_if_exists(&self.metadata_path)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
