// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token watcher: waits for the agent to write its token, then ends the
//! login process and restarts the dependent service.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::process::{shutdown_process, TERMINATE_GRACE};
use super::{FlowId, FlowProcess, LoginEvent};
use crate::service::ServiceControl;
use crate::token::{TokenBaseline, TokenStore};

/// How a watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    TokenAcquired { service_restarted: bool },
    /// Attempts exhausted; the process is left to the flow deadline.
    Expired,
    Cancelled,
}

pub struct TokenWatch {
    pub flow_id: FlowId,
    pub process: Arc<dyn FlowProcess>,
    /// The flow's process deadline, disarmed once the token arrives.
    pub deadline: CancellationToken,
    /// Only a token written after this counts.
    pub baseline: TokenBaseline,
    pub tokens: Arc<TokenStore>,
    pub service: Arc<dyn ServiceControl>,
    pub events: broadcast::Sender<LoginEvent>,
    pub interval: Duration,
    pub attempts: u32,
    pub shutdown: CancellationToken,
}

impl TokenWatch {
    pub async fn run(self) -> WatchOutcome {
        for _ in 0..self.attempts {
            if self.tokens.token_written_since(self.baseline) {
                return self.on_token().await;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return WatchOutcome::Cancelled,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!(flow_id = %self.flow_id, "no token within the watch window");
        let _ = self.events.send(LoginEvent::WatchExpired { flow_id: self.flow_id.clone() });
        WatchOutcome::Expired
    }

    async fn on_token(&self) -> WatchOutcome {
        let flow_id = self.flow_id.clone();
        tracing::info!(flow_id = %flow_id, pid = ?self.process.pid(), "token acquired");
        shutdown_process(self.process.as_ref(), TERMINATE_GRACE).await;
        self.deadline.cancel();
        let _ = self.events.send(LoginEvent::TokenAcquired { flow_id: flow_id.clone() });

        match self.service.restart().await {
            Ok(()) => {
                tracing::info!(flow_id = %flow_id, "device service restarted after login");
                let _ = self.events.send(LoginEvent::ServiceRestarted { flow_id });
                WatchOutcome::TokenAcquired { service_restarted: true }
            }
            Err(e) => {
                tracing::warn!(flow_id = %flow_id, err = %e, "device service restart failed");
                let _ = self
                    .events
                    .send(LoginEvent::ServiceRestartFailed { flow_id, error: format!("{e:#}") });
                WatchOutcome::TokenAcquired { service_restarted: false }
            }
        }
    }
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
