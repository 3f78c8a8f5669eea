// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: builders, fakes, and assertion helpers.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use clap::Parser;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::config::AdminConfig;
use crate::login::{FlowProcess, ProcessStatus};
use crate::service::{BoxFuture, ServiceControl, ServiceStatus};
use crate::state::AdminState;

/// Write an executable `/bin/sh` script standing in for the agent CLI.
pub fn write_script(dir: &Path, name: &str, body: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o755)
        .open(&path)?;
    file.write_all(b"#!/bin/sh\n")?;
    file.write_all(body.as_bytes())?;
    file.sync_all()?;
    Ok(path)
}

/// Build an unsigned `header.payload.sig` token around `claims`.
pub fn fake_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

/// In-memory [`FlowProcess`] with scripted status and signal counters.
pub struct FakeProcess {
    pid: u32,
    status: Mutex<ProcessStatus>,
    terminations: AtomicU32,
    kills: AtomicU32,
    /// When set, SIGTERM is counted but does not end the process.
    ignore_term: AtomicBool,
}

impl FakeProcess {
    pub fn running(pid: u32) -> Arc<Self> {
        Arc::new(Self {
            pid,
            status: Mutex::new(ProcessStatus::Running),
            terminations: AtomicU32::new(0),
            kills: AtomicU32::new(0),
            ignore_term: AtomicBool::new(false),
        })
    }

    pub fn stubborn(pid: u32) -> Arc<Self> {
        let process = Self::running(pid);
        process.ignore_term.store(true, Ordering::Relaxed);
        process
    }

    pub fn set_status(&self, status: ProcessStatus) {
        *self.status.lock() = status;
    }

    pub fn terminations(&self) -> u32 {
        self.terminations.load(Ordering::Relaxed)
    }

    pub fn kills(&self) -> u32 {
        self.kills.load(Ordering::Relaxed)
    }
}

impl FlowProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn status(&self) -> ProcessStatus {
        *self.status.lock()
    }

    fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::Relaxed);
        if self.ignore_term.load(Ordering::Relaxed) {
            return;
        }
        let mut status = self.status.lock();
        if *status == ProcessStatus::Running {
            *status = ProcessStatus::Signaled;
        }
    }

    fn kill(&self) {
        self.kills.fetch_add(1, Ordering::Relaxed);
        let mut status = self.status.lock();
        if *status == ProcessStatus::Running {
            *status = ProcessStatus::Signaled;
        }
    }
}

/// [`ServiceControl`] that records every call instead of touching systemd.
pub struct RecordingService {
    calls: Mutex<Vec<&'static str>>,
    fail: AtomicBool,
    active: AtomicBool,
}

impl RecordingService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            active: AtomicBool::new(true),
        })
    }

    /// Every control call fails.
    pub fn failing() -> Arc<Self> {
        let service = Self::new();
        service.fail.store(true, Ordering::Relaxed);
        service
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    fn record(&self, call: &'static str) -> anyhow::Result<()> {
        self.calls.lock().push(call);
        if self.fail.load(Ordering::Relaxed) {
            anyhow::bail!("{call} refused by test service");
        }
        Ok(())
    }
}

impl ServiceControl for RecordingService {
    fn restart(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move { self.record("restart") })
    }

    fn stop(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            let result = self.record("stop");
            if result.is_ok() {
                self.active.store(false, Ordering::Relaxed);
            }
            result
        })
    }

    fn status(&self) -> BoxFuture<'_, ServiceStatus> {
        Box::pin(async move {
            self.calls.lock().push("status");
            let active = self.active.load(Ordering::Relaxed);
            let detail = if active { "Active: active (running)" } else { "Active: inactive (dead)" };
            ServiceStatus { active, enabled: true, detail: detail.to_owned() }
        })
    }
}

/// Builder for an [`AdminState`] rooted in a temporary directory, with
/// timings short enough for tests.
pub struct AdminBuilder {
    dir: TempDir,
    config: AdminConfig,
    service: Arc<RecordingService>,
}

/// A built state together with the fakes and files behind it.
pub struct TestAdmin {
    pub state: Arc<AdminState>,
    pub service: Arc<RecordingService>,
    pub dir: TempDir,
}

impl AdminBuilder {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        let mut config = AdminConfig::parse_from(["gwadmin"]);
        config.admin_username = "admin".to_owned();
        config.admin_password = "hunter2".to_owned();
        config.agent_cli = root.join("missing-agent").to_string_lossy().into_owned();
        config.org = None;
        config.token_path = root.join("client_token");
        config.token_metadata_path = root.join("client_token.meta.json");
        config.org_path = root.join("org");
        config.device_state_path = None;
        config.breadcrumb_path = root.join("first_login.done");
        config.version_cache_path = root.join("version_cache.json");
        config.latest_version_url = String::new();
        config.agent_user = "gwtest".to_owned();
        config.agent_home = root.to_path_buf();
        config.url_timeout_secs = 5;
        config.watch_interval_ms = 20;
        config.watch_attempts = 250;
        config.erase_first_delay_secs = 3600;
        config.erase_delay_secs = 3600;
        Ok(Self { dir, config, service: RecordingService::new() })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Use a shell script as the agent CLI.
    pub fn agent_script(mut self, body: &str) -> anyhow::Result<Self> {
        let cli = write_script(self.dir.path(), "agent", body)?;
        self.config.agent_cli = cli.to_string_lossy().into_owned();
        Ok(self)
    }

    pub fn org(mut self, org: &str) -> Self {
        self.config.org = Some(org.to_owned());
        self
    }

    pub fn service(mut self, service: Arc<RecordingService>) -> Self {
        self.service = service;
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut AdminConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> anyhow::Result<TestAdmin> {
        let service: Arc<dyn ServiceControl> = self.service.clone();
        let state = AdminState::new(self.config, service, CancellationToken::new())?;
        Ok(TestAdmin { state: Arc::new(state), service: self.service, dir: self.dir })
    }
}

impl TestAdmin {
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Drop a token for `claims` where the agent would write it.
    pub fn write_token(&self, claims: &serde_json::Value) -> anyhow::Result<()> {
        self.state.tokens.write_token(&fake_token(claims))
    }
}

/// Extension trait to convert any `Display` error into `anyhow::Error`.
/// Replaces `.map_err(|e| anyhow::anyhow!("{e}"))` with `.anyhow()`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
