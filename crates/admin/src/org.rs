// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The organization this gateway is bound to.
//!
//! Once an org is recorded the binding is locked: a different org can only
//! be set after an explicit reset.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::persist;
use crate::service::ServiceControl;
use crate::token::TokenClaims;

/// On-disk org record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgRecord {
    #[serde(default)]
    pub org_subdomain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
}

#[derive(Debug)]
pub enum OrgError {
    Empty,
    Locked { current: String },
    Persist(anyhow::Error),
}

impl fmt::Display for OrgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("organization name cannot be empty"),
            Self::Locked { current } => {
                write!(f, "gateway is bound to organization {current:?}; reset it first")
            }
            Self::Persist(e) => write!(f, "failed to save organization: {e:#}"),
        }
    }
}

impl std::error::Error for OrgError {}

/// Outcome of [`OrgBinding::reset`]. Every step runs; failures are collected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub org_removed: bool,
    pub device_state_removed: bool,
    pub service_stopped: bool,
    pub errors: Vec<String>,
}

pub struct OrgBinding {
    override_org: Option<String>,
    org_path: PathBuf,
    device_state_path: PathBuf,
    service: Arc<dyn ServiceControl>,
}

impl OrgBinding {
    pub fn new(
        override_org: Option<String>,
        org_path: PathBuf,
        device_state_path: PathBuf,
        service: Arc<dyn ServiceControl>,
    ) -> Self {
        let override_org = override_org.map(|o| o.trim().to_owned()).filter(|o| !o.is_empty());
        Self { override_org, org_path, device_state_path, service }
    }

    /// Effective org: the configured override, else the org file; empty when
    /// neither is set.
    pub fn get(&self) -> String {
        match self.override_org {
            Some(ref org) => org.clone(),
            None => self.record().org_subdomain,
        }
    }

    pub fn is_locked(&self) -> bool {
        !self.get().is_empty()
    }

    /// Stored record. The file is JSON, with plain text accepted for files
    /// written by older tooling.
    pub fn record(&self) -> OrgRecord {
        let raw = match std::fs::read_to_string(&self.org_path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.org_path.display(), err = %e, "org file unreadable");
                }
                return OrgRecord::default();
            }
        };
        match serde_json::from_str::<OrgRecord>(&raw) {
            Ok(mut record) => {
                record.org_subdomain = record.org_subdomain.trim().to_owned();
                record
            }
            Err(_) => OrgRecord { org_subdomain: raw.trim().to_owned(), org_id: None },
        }
    }

    pub fn set(&self, name: &str) -> Result<(), OrgError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(OrgError::Empty);
        }
        let current = self.get();
        if !current.is_empty() && current != name {
            return Err(OrgError::Locked { current });
        }
        let mut record = self.record();
        if record.org_subdomain != name {
            record = OrgRecord { org_subdomain: name.to_owned(), org_id: None };
        }
        persist::save_json(&self.org_path, &record).map_err(OrgError::Persist)?;
        tracing::info!(org = %name, "organization set");
        Ok(())
    }

    /// Record the org a completed login belongs to. Returns whether the
    /// record changed; claims for a different org than the lock are ignored.
    pub fn bind_claims(&self, claims: &TokenClaims) -> Result<bool, OrgError> {
        let Some(subdomain) = claims.org_subdomain.as_deref().map(str::trim).filter(|s| !s.is_empty())
        else {
            return Ok(false);
        };
        let current = self.get();
        if !current.is_empty() && current != subdomain {
            tracing::warn!(org = %current, claimed = %subdomain, "login claims name another organization");
            return Ok(false);
        }
        let record =
            OrgRecord { org_subdomain: subdomain.to_owned(), org_id: claims.org_id.clone() };
        if self.record() == record {
            return Ok(false);
        }
        persist::save_json(&self.org_path, &record).map_err(OrgError::Persist)?;
        tracing::info!(org = %subdomain, org_id = ?record.org_id, "organization bound from login");
        Ok(true)
    }

    /// Unbind the gateway: forget the org and the agent's device state, and
    /// stop the dependent service.
    pub async fn reset(&self) -> ResetReport {
        let mut report = ResetReport::default();
        match persist::remove_if_exists(&self.org_path) {
            Ok(removed) => report.org_removed = removed,
            Err(e) => report.errors.push(format!("remove {}: {e}", self.org_path.display())),
        }
        match persist::remove_if_exists(&self.device_state_path) {
            Ok(removed) => report.device_state_removed = removed,
            Err(e) => {
                report.errors.push(format!("remove {}: {e}", self.device_state_path.display()))
            }
        }
        match self.service.stop().await {
            Ok(()) => report.service_stopped = true,
            Err(e) => report.errors.push(format!("{e:#}")),
        }
        if report.errors.is_empty() {
            tracing::info!("organization reset");
        } else {
            tracing::warn!(errors = ?report.errors, "organization reset incomplete");
        }
        report
    }
}

#[cfg(test)]
#[path = "org_tests.rs"]
mod tests;
