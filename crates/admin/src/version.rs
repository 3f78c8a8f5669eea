// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent version check and in-place upgrade.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

use crate::login::process::OutputLines;
use crate::persist;
use crate::service::run_with_timeout;

const VERSION_TIMEOUT: Duration = Duration::from_secs(30);
const LATEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Persisted result of the last version check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCache {
    pub current_version: String,
    pub update_available: bool,
    #[serde(default)]
    pub new_version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionCheck {
    #[serde(flatten)]
    pub cache: VersionCache,
    /// Problems that did not prevent the check.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Progress of `version upgrade`.
#[derive(Debug, Clone, PartialEq)]
pub enum UpgradeEvent {
    Start,
    Progress { percent: f64 },
    Done { success: bool, version: Option<String> },
}

pub struct AgentVersion {
    cli: String,
    cache_path: PathBuf,
    latest_url: Option<String>,
    http: reqwest::Client,
    version_pattern: Regex,
    progress_pattern: Regex,
    upgrade_lock: Arc<Mutex<()>>,
}

impl AgentVersion {
    pub fn new(
        cli: impl Into<String>,
        cache_path: PathBuf,
        latest_url: Option<String>,
    ) -> anyhow::Result<Self> {
        // reqwest is built without a bundled crypto provider.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let http = reqwest::Client::builder().timeout(LATEST_TIMEOUT).build()?;
        Ok(Self {
            cli: cli.into(),
            cache_path,
            latest_url: latest_url.filter(|url| !url.trim().is_empty()),
            http,
            version_pattern: Regex::new(r"version:\s*(v\S+)")?,
            progress_pattern: Regex::new(r"\[.*?\]\s*(\d+(?:\.\d+)?)%")?,
            upgrade_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn parse_version(&self, output: &str) -> Option<String> {
        let captures = self.version_pattern.captures(output)?;
        captures.get(1).map(|m| m.as_str().to_owned())
    }

    /// Percentage from a progress bar line such as `[====>   ] 42.5%`.
    pub fn parse_progress(&self, line: &str) -> Option<f64> {
        self.progress_pattern.captures(line)?.get(1)?.as_str().parse().ok()
    }

    /// Installed agent version; `unknown` when the output names none.
    pub async fn current(&self) -> anyhow::Result<String> {
        let out = run_with_timeout(&self.cli, &["--version"], VERSION_TIMEOUT).await?;
        let text = format!(
            "{}\n{}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        );
        if !out.status.success() {
            anyhow::bail!("{} --version failed: {}", self.cli, text.trim());
        }
        Ok(self.parse_version(&text).unwrap_or_else(|| "unknown".to_owned()))
    }

    /// Latest published version. `None` when no source is configured.
    pub async fn latest(&self) -> anyhow::Result<Option<String>> {
        let Some(ref url) = self.latest_url else {
            return Ok(None);
        };
        let body = self.http.get(url).send().await?.error_for_status()?.text().await?;
        let latest = body.trim();
        Ok((!latest.is_empty()).then(|| latest.to_owned()))
    }

    /// Compare the installed version with the latest one and persist the
    /// result. Only a failure to read the installed version is an error.
    pub async fn check(&self) -> anyhow::Result<VersionCheck> {
        let current = self.current().await?;
        let mut warnings = Vec::new();
        let latest = match self.latest().await {
            Ok(latest) => latest,
            Err(e) => {
                tracing::warn!(err = %e, "latest agent version unavailable");
                warnings.push(format!("Failed to fetch latest version info: {e:#}"));
                None
            }
        };
        let update_available = latest.as_deref().is_some_and(|l| l != current);
        let cache = VersionCache { current_version: current, update_available, new_version: latest };
        if let Err(e) = persist::save_json(&self.cache_path, &cache) {
            tracing::warn!(err = %e, "failed to write version cache");
            warnings.push(format!("Failed to write version cache: {e:#}"));
        }
        tracing::info!(
            current = %cache.current_version,
            latest = ?cache.new_version,
            update_available,
            "agent version checked"
        );
        Ok(VersionCheck { cache, warnings })
    }

    /// The last persisted check, if any.
    pub fn cached(&self) -> Option<VersionCache> {
        let raw = std::fs::read_to_string(&self.cache_path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::debug!(err = %e, "version cache unreadable");
                None
            }
        }
    }

    /// Claim the upgrade slot. `None` while another upgrade runs.
    pub fn try_begin_upgrade(&self) -> Option<OwnedMutexGuard<()>> {
        Arc::clone(&self.upgrade_lock).try_lock_owned().ok()
    }

    /// Run `version upgrade`, reporting progress on `events`. Returns whether
    /// the upgrade succeeded; on success the cache records the new version.
    ///
    /// The upgrade runs to completion even when nobody listens.
    pub async fn upgrade(&self, events: mpsc::Sender<UpgradeEvent>) -> anyhow::Result<bool> {
        let mut child = tokio::process::Command::new(&self.cli)
            .args(["version", "upgrade"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to run {} version upgrade", self.cli))?;
        let stdout = child.stdout.take().context("stdout not captured")?;
        let stderr = child.stderr.take().context("stderr not captured")?;
        let mut lines = OutputLines::new(stdout, stderr);
        tracing::info!(pid = ?child.id(), "agent upgrade started");
        let _ = events.send(UpgradeEvent::Start).await;

        while let Some(line) = lines.next_line().await {
            tracing::debug!(line = %line, "upgrade output");
            if let Some(percent) = self.parse_progress(&line) {
                let _ = events.send(UpgradeEvent::Progress { percent }).await;
            }
        }
        let status = child.wait().await?;
        let success = status.success();
        let version = if success { self.refresh_after_upgrade().await } else { None };
        tracing::info!(success, version = ?version, "agent upgrade finished");
        let _ = events.send(UpgradeEvent::Done { success, version }).await;
        Ok(success)
    }

    async fn refresh_after_upgrade(&self) -> Option<String> {
        let version = match self.current().await {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(err = %e, "version unavailable after upgrade");
                return None;
            }
        };
        let cache = VersionCache {
            current_version: version.clone(),
            update_available: false,
            new_version: Some(version.clone()),
        };
        if let Err(e) = persist::save_json(&self.cache_path, &cache) {
            tracing::warn!(err = %e, "failed to write version cache");
        }
        Some(version)
    }
}

#[cfg(test)]
#[path = "version_tests.rs"]
mod tests;
