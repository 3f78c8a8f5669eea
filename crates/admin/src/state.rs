// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::agent::NodeAgent;
use crate::config::AdminConfig;
use crate::login::{LoginCommand, LoginOrchestrator};
use crate::org::OrgBinding;
use crate::service::ServiceControl;
use crate::session::SessionStore;
use crate::token::{DeferredTokenEraser, TokenStore};
use crate::version::AgentVersion;

/// Shared state of the admin server.
pub struct AdminState {
    pub config: AdminConfig,
    pub tokens: Arc<TokenStore>,
    pub eraser: DeferredTokenEraser,
    pub org: OrgBinding,
    pub login: LoginOrchestrator,
    pub sessions: SessionStore,
    pub service: Arc<dyn ServiceControl>,
    pub agent: NodeAgent,
    pub version: AgentVersion,
    /// Tracks deferred erases; login tasks are tracked by the orchestrator.
    pub tasks: TaskTracker,
    pub shutdown: CancellationToken,
}

impl AdminState {
    pub fn new(
        config: AdminConfig,
        service: Arc<dyn ServiceControl>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let tokens = Arc::new(TokenStore::new(
            config.token_path.clone(),
            config.token_metadata_path.clone(),
        ));
        let tasks = TaskTracker::new();
        let eraser = DeferredTokenEraser::new(
            Arc::clone(&tokens),
            config.breadcrumb_path.clone(),
            config.erase_first_delay(),
            config.erase_delay(),
            tasks.clone(),
            shutdown.clone(),
        );
        let org = OrgBinding::new(
            config.org.clone(),
            config.org_path.clone(),
            config.device_state_path(),
            Arc::clone(&service),
        );
        let command = LoginCommand {
            cli: config.agent_cli.clone(),
            user: config.agent_user.clone(),
            home: config.agent_home.clone(),
        };
        let login = LoginOrchestrator::new(
            command,
            config.login_timings(),
            Arc::clone(&tokens),
            Arc::clone(&service),
            &shutdown,
        )?;
        let agent = NodeAgent::new(config.agent_cli.clone());
        let version = AgentVersion::new(
            config.agent_cli.clone(),
            config.version_cache_path.clone(),
            Some(config.latest_version_url.clone()),
        )?;
        Ok(Self {
            config,
            tokens,
            eraser,
            org,
            login,
            sessions: SessionStore::new(),
            service,
            agent,
            version,
            tasks,
            shutdown,
        })
    }

    /// Cancel background work, terminate live logins and wait for every
    /// tracked task to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.login.shutdown().await;
        self.tasks.close();
        self.tasks.wait().await;
    }
}

pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
