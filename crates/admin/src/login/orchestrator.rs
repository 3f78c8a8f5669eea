// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::process::{
    kill_stale_logins, shutdown_process, wait_for_exit, OutputLines, TERMINATE_GRACE,
};
use super::watcher::TokenWatch;
use super::{
    AgentProcess, FlowId, FlowProcess, LoginCommand, LoginError, LoginEvent, LoginFlowRegistry,
    LoginStart, LoginTimings, PollStatus, ProcessStatus,
};
use crate::service::ServiceControl;
use crate::token::{decode_claims, TokenClaims, TokenStore};

/// How long to wait for an exit code once the agent closed its output.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Drives device-identity logins from spawn to token.
pub struct LoginOrchestrator {
    command: LoginCommand,
    timings: LoginTimings,
    registry: LoginFlowRegistry,
    tokens: Arc<TokenStore>,
    service: Arc<dyn ServiceControl>,
    events: broadcast::Sender<LoginEvent>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    url_pattern: Regex,
}

impl LoginOrchestrator {
    pub fn new(
        command: LoginCommand,
        timings: LoginTimings,
        tokens: Arc<TokenStore>,
        service: Arc<dyn ServiceControl>,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<Self> {
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            command,
            timings,
            registry: LoginFlowRegistry::new(),
            tokens,
            service,
            events,
            tasks: TaskTracker::new(),
            shutdown: shutdown.child_token(),
            url_pattern: Regex::new(r"https?://\S+")?,
        })
    }

    pub fn timings(&self) -> LoginTimings {
        self.timings
    }

    pub fn registry(&self) -> &LoginFlowRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoginEvent> {
        self.events.subscribe()
    }

    /// Spawn the agent login for `org` and wait for it to print a login URL.
    pub async fn start(
        &self,
        org: &str,
        requested: Option<FlowId>,
    ) -> Result<LoginStart, LoginError> {
        let org = org.trim();
        if org.is_empty() {
            return Err(LoginError::MissingOrg);
        }
        let flow_id = requested.unwrap_or_else(FlowId::generate);
        let baseline = self.tokens.baseline();

        kill_stale_logins(&self.command).await;
        let (process, mut lines) =
            AgentProcess::spawn(&self.command, org).map_err(LoginError::Spawn)?;
        let process: Arc<dyn FlowProcess> = Arc::new(process);
        tracing::info!(flow_id = %flow_id, org, pid = ?process.pid(), "login process started");

        let pattern = &self.url_pattern;
        let scan = lines.scan(|line| pattern.find(line).map(|m| m.as_str().to_owned()));
        let scanned = tokio::time::timeout(self.timings.url_timeout, scan).await;
        let login_url = match scanned {
            Ok(Some(url)) => url,
            Ok(None) => {
                let status = wait_for_exit(process.as_ref(), EXIT_GRACE).await;
                if status == ProcessStatus::Running {
                    self.terminate_in_background(Arc::clone(&process));
                }
                let exit_code = match status {
                    ProcessStatus::Exited(code) => Some(code),
                    _ => None,
                };
                let output = lines.transcript();
                tracing::warn!(flow_id = %flow_id, ?exit_code, output = %output, "login URL not found");
                return Err(LoginError::UrlNotFound { output, exit_code });
            }
            Err(_) => {
                self.terminate_in_background(Arc::clone(&process));
                let output = lines.transcript();
                tracing::warn!(flow_id = %flow_id, output = %output, "timed out waiting for login URL");
                return Err(LoginError::UrlTimeout { output, timeout: self.timings.url_timeout });
            }
        };

        let deadline =
            self.registry.register(flow_id.clone(), Arc::clone(&process), baseline, Instant::now());
        let pid = process.pid();
        tracing::info!(flow_id = %flow_id, ?pid, "login URL found");

        self.tasks.spawn(drain_output(lines, flow_id.clone(), self.shutdown.clone()));
        self.tasks.spawn(enforce_deadline(
            Arc::clone(&process),
            deadline.clone(),
            self.shutdown.clone(),
            self.timings.login_deadline,
            flow_id.clone(),
            self.events.clone(),
        ));
        let watch = TokenWatch {
            flow_id: flow_id.clone(),
            process,
            deadline,
            baseline,
            tokens: Arc::clone(&self.tokens),
            service: Arc::clone(&self.service),
            events: self.events.clone(),
            interval: self.timings.watch_interval,
            attempts: self.timings.watch_attempts,
            shutdown: self.shutdown.clone(),
        };
        self.tasks.spawn(watch.run());

        let _ = self.events.send(LoginEvent::UrlFound { flow_id: flow_id.clone(), pid });
        Ok(LoginStart { flow_id, login_url })
    }

    /// Status of a flow as seen by the polling browser.
    pub fn poll(&self, flow_id: &FlowId) -> PollStatus {
        for swept in self.registry.sweep(self.timings.flow_ttl, Instant::now()) {
            let _ = self.events.send(LoginEvent::Swept { flow_id: swept });
        }
        let Some((process, baseline)) = self.registry.snapshot(flow_id) else {
            return PollStatus::pending();
        };
        if self.tokens.token_written_since(baseline) {
            return PollStatus::authenticated();
        }
        match process.status() {
            ProcessStatus::Exited(code) if code != 0 => {
                self.registry.pop(flow_id);
                tracing::warn!(flow_id = %flow_id, code, "login process failed");
                PollStatus::failed(format!("Authentication process exited with code {code}"))
            }
            _ => PollStatus::pending(),
        }
    }

    /// Finish a flow: remove it and decode the token it produced. A token
    /// file older than the flow is not accepted.
    pub fn complete(&self, flow_id: &FlowId) -> Result<TokenClaims, LoginError> {
        let flow = self.registry.pop(flow_id).ok_or(LoginError::UnknownFlow)?;
        if flow.process.status() == ProcessStatus::Running {
            self.terminate_in_background(Arc::clone(&flow.process));
        }
        let baseline = flow.token_baseline;
        drop(flow);

        if !self.tokens.token_written_since(baseline) {
            return Err(LoginError::InvalidToken("no token was written by this login".to_owned()));
        }
        let token = self
            .tokens
            .read_token()
            .ok_or_else(|| LoginError::InvalidToken("no token was written".to_owned()))?;
        let claims =
            decode_claims(&token).map_err(|e| LoginError::InvalidToken(e.to_string()))?;
        tracing::info!(flow_id = %flow_id, subject = ?claims.subject(), "login completed");
        Ok(claims)
    }

    /// Stop background work and terminate every live login process.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for (flow_id, flow) in self.registry.drain() {
            tracing::debug!(flow_id = %flow_id, "terminating login at shutdown");
            flow.process.terminate();
        }
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn terminate_in_background(&self, process: Arc<dyn FlowProcess>) {
        self.tasks.spawn(async move {
            shutdown_process(process.as_ref(), TERMINATE_GRACE).await;
        });
    }
}

/// Keep reading agent output after the URL so the agent never blocks on a
/// full pipe.
async fn drain_output(mut lines: OutputLines, flow_id: FlowId, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            line = lines.next_line() => match line {
                Some(line) => tracing::debug!(flow_id = %flow_id, line = %line, "agent output"),
                None => return,
            },
        }
    }
}

/// Terminate the login process group once `after` elapses, unless the flow
/// is disarmed first.
async fn enforce_deadline(
    process: Arc<dyn FlowProcess>,
    deadline: CancellationToken,
    shutdown: CancellationToken,
    after: Duration,
    flow_id: FlowId,
    events: broadcast::Sender<LoginEvent>,
) {
    tokio::select! {
        _ = deadline.cancelled() => {}
        _ = shutdown.cancelled() => {
            shutdown_process(process.as_ref(), TERMINATE_GRACE).await;
        }
        _ = tokio::time::sleep(after) => {
            tracing::info!(flow_id = %flow_id, pid = ?process.pid(), "login deadline reached");
            shutdown_process(process.as_ref(), TERMINATE_GRACE).await;
            let _ = events.send(LoginEvent::DeadlineReached { flow_id });
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
