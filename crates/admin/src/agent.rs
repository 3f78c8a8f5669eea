// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured queries against the VPN agent CLI (`node ...` subcommands).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::service::{combined_output, run_with_timeout};

const STATE_TIMEOUT: Duration = Duration::from_secs(20);
const EXITNODE_TIMEOUT: Duration = Duration::from_secs(30);

/// Output of `node state show --json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeState {
    #[serde(default)]
    pub exit_node: Option<String>,
    #[serde(default)]
    pub peers: Vec<Peer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Peer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub services: Vec<PeerService>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerService {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub dns_name: Option<String>,
    #[serde(default)]
    pub public_ips: Vec<serde_json::Value>,
}

/// An exit node offered by some peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitNode {
    pub name: String,
    pub peer_name: String,
    pub dns_name: Option<String>,
    pub public_ips: Vec<serde_json::Value>,
}

impl NodeState {
    /// Every `exit_node` service across all peers, in peer order.
    pub fn exit_nodes(&self) -> Vec<ExitNode> {
        self.peers
            .iter()
            .flat_map(|peer| {
                peer.services.iter().filter(|svc| svc.kind == "exit_node").map(|svc| ExitNode {
                    name: svc.name.clone(),
                    peer_name: peer.name.clone(),
                    dns_name: svc.dns_name.clone(),
                    public_ips: svc.public_ips.clone(),
                })
            })
            .collect()
    }

    /// Current exit node, with the agent's empty string read as none.
    pub fn current_exit_node(&self) -> Option<&str> {
        self.exit_node.as_deref().filter(|s| !s.is_empty())
    }
}

/// Client for the agent CLI's node subcommands.
#[derive(Debug, Clone)]
pub struct NodeAgent {
    cli: String,
}

impl NodeAgent {
    pub fn new(cli: impl Into<String>) -> Self {
        Self { cli: cli.into() }
    }

    pub async fn state(&self) -> anyhow::Result<NodeState> {
        let out =
            run_with_timeout(&self.cli, &["node", "state", "show", "--json"], STATE_TIMEOUT).await?;
        if !out.status.success() {
            anyhow::bail!("node state failed: {}", combined_output(&out));
        }
        Ok(serde_json::from_slice(&out.stdout)?)
    }

    /// Select an exit node, or clear it with `None`. Returns the agent's message.
    pub async fn set_exit_node(&self, name: Option<&str>) -> anyhow::Result<String> {
        let out = match name {
            Some(name) => {
                check_exit_node_name(name)?;
                run_with_timeout(
                    &self.cli,
                    &["node", "exitnode", "set", name, "--json"],
                    EXITNODE_TIMEOUT,
                )
                .await?
            }
            None => {
                run_with_timeout(&self.cli, &["node", "exitnode", "unset", "--json"], EXITNODE_TIMEOUT)
                    .await?
            }
        };
        if !out.status.success() {
            anyhow::bail!("failed to set exit node: {}", combined_output(&out));
        }
        Ok(exitnode_message(&out.stdout))
    }
}

/// Names reach the agent as a positional argument and must not read as a flag.
pub fn check_exit_node_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() || name.starts_with('-') || name.chars().any(char::is_whitespace) {
        anyhow::bail!("invalid exit node name: {name:?}");
    }
    Ok(())
}

/// The `message` member of the agent's JSON reply, or the raw text.
fn exitnode_message(stdout: &[u8]) -> String {
    #[derive(Deserialize)]
    struct Reply {
        #[serde(default)]
        message: String,
    }
    match serde_json::from_slice::<Reply>(stdout) {
        Ok(reply) => reply.message.trim().to_owned(),
        Err(_) => String::from_utf8_lossy(stdout).trim().to_owned(),
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
