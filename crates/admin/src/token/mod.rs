// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer token handling: unverified claim decoding, the on-disk token and
//! claims cache, and deferred token erasure.
//!
//! The token's trust boundary is the local filesystem: whoever can write the
//! token file is already trusted, so claims are decoded without verifying
//! the signature.

pub mod eraser;
pub mod store;

use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::{DecodePaddingMode, GeneralPurpose};
use base64::Engine;
use serde::{Deserialize, Serialize};

pub use eraser::DeferredTokenEraser;
pub use store::{TokenBaseline, TokenStore};

/// base64url that accepts the payload with or without `=` padding.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decoded (unverified) payload of the agent's bearer token.
///
/// Also the on-disk format of the claims cache, which additionally carries
/// `device_id` once a browser session binds to the token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_subdomain: Option<String>,
    /// Issued-at, epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Expiry, epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Remaining payload members (name, picture, ...) kept for display.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenClaims {
    /// User identity: `sub`, falling back to `user_email`.
    pub fn subject(&self) -> Option<&str> {
        self.sub.as_deref().or(self.user_email.as_deref()).filter(|s| !s.is_empty())
    }
}

/// Why a token payload could not be decoded.
#[derive(Debug)]
pub enum DecodeError {
    /// Fewer than two dot-separated segments, or an empty payload segment.
    MissingPayload,
    Base64(base64::DecodeError),
    Json(serde_json::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPayload => f.write_str("token has no payload segment"),
            Self::Base64(e) => write!(f, "token payload is not base64url: {e}"),
            Self::Json(e) => write!(f, "token payload is not a JSON object: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MissingPayload => None,
            Self::Base64(e) => Some(e),
            Self::Json(e) => Some(e),
        }
    }
}

impl From<base64::DecodeError> for DecodeError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Base64(e)
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Decode the middle segment of a `header.payload.signature` token.
pub fn decode_claims(token: &str) -> Result<TokenClaims, DecodeError> {
    let payload = token
        .trim()
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or(DecodeError::MissingPayload)?;
    let bytes = PAYLOAD_ENGINE.decode(payload)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
