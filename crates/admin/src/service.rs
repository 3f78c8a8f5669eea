// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control of the dependent device service through systemd.

use std::future::Future;
use std::pin::Pin;
use std::process::Output;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of the dependent service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub active: bool,
    pub enabled: bool,
    /// Raw `systemctl status` text, or the error that prevented reading it.
    pub detail: String,
}

/// Lifecycle operations on the service that consumes the agent token.
pub trait ServiceControl: Send + Sync {
    fn restart(&self) -> BoxFuture<'_, anyhow::Result<()>>;
    fn stop(&self) -> BoxFuture<'_, anyhow::Result<()>>;
    fn status(&self) -> BoxFuture<'_, ServiceStatus>;
}

/// [`ServiceControl`] backed by `systemctl`.
pub struct Systemctl {
    unit: String,
}

impl Systemctl {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }

    async fn control(&self, verb: &str) -> anyhow::Result<()> {
        let out = run_with_timeout("systemctl", &[verb, self.unit.as_str()], CONTROL_TIMEOUT).await?;
        if out.status.success() {
            Ok(())
        } else {
            anyhow::bail!("systemctl {verb} {} failed: {}", self.unit, combined_output(&out))
        }
    }
}

impl ServiceControl for Systemctl {
    fn restart(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(self.control("restart"))
    }

    fn stop(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(self.control("stop"))
    }

    fn status(&self) -> BoxFuture<'_, ServiceStatus> {
        Box::pin(async move {
            let unit = format!("{}.service", self.unit);
            let (active, detail) =
                match run_with_timeout("systemctl", &["status", unit.as_str(), "-n0"], STATUS_TIMEOUT).await {
                    Ok(out) => {
                        let detail = combined_output(&out);
                        (is_active(&detail), detail)
                    }
                    Err(e) => (false, format!("Error obtaining service status: {e:#}")),
                };
            let enabled =
                match run_with_timeout("systemctl", &["is-enabled", unit.as_str()], STATUS_TIMEOUT).await {
                    Ok(out) => String::from_utf8_lossy(&out.stdout).trim() == "enabled",
                    Err(_) => false,
                };
            ServiceStatus { active, enabled, detail }
        })
    }
}

/// `systemctl status` reports a running unit as `Active: active (running)`.
pub fn is_active(status_text: &str) -> bool {
    status_text.contains("Active: active")
}

/// Run a command to completion, killing it if `timeout` elapses.
pub(crate) async fn run_with_timeout(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> anyhow::Result<Output> {
    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();
    tokio::time::timeout(timeout, child)
        .await
        .with_context(|| format!("{program} timed out after {}s", timeout.as_secs()))?
        .with_context(|| format!("failed to run {program}"))
}

/// Stdout, or stderr when stdout is empty.
pub(crate) fn combined_output(out: &Output) -> String {
    let stdout = String::from_utf8_lossy(&out.stdout);
    if stdout.trim().is_empty() {
        String::from_utf8_lossy(&out.stderr).trim().to_owned()
    } else {
        stdout.trim().to_owned()
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
