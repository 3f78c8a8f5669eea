// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{FlowId, FlowProcess};
use crate::token::TokenBaseline;

/// One in-flight login attempt.
pub struct LoginFlow {
    pub process: Arc<dyn FlowProcess>,
    pub started_at: Instant,
    /// Token file state captured before the process was spawned.
    pub token_baseline: TokenBaseline,
    /// Disarms the flow's process deadline. Cancelled when the entry drops.
    deadline: CancellationToken,
}

impl LoginFlow {
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) > ttl
    }

    pub fn deadline(&self) -> &CancellationToken {
        &self.deadline
    }
}

impl Drop for LoginFlow {
    fn drop(&mut self) {
        self.deadline.cancel();
    }
}

/// Table of in-flight login attempts keyed by flow id.
///
/// Sweeping is O(n) in live entries, bounded by concurrent browser tabs.
#[derive(Default)]
pub struct LoginFlowRegistry {
    flows: Mutex<HashMap<FlowId, LoginFlow>>,
}

impl LoginFlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a flow. A replaced flow's process is terminated so
    /// at most one live process exists per flow id.
    ///
    /// Returns the new flow's deadline token.
    pub fn register(
        &self,
        flow_id: FlowId,
        process: Arc<dyn FlowProcess>,
        token_baseline: TokenBaseline,
        now: Instant,
    ) -> CancellationToken {
        let deadline = CancellationToken::new();
        let flow = LoginFlow {
            process: Arc::clone(&process),
            started_at: now,
            token_baseline,
            deadline: deadline.clone(),
        };
        let replaced = self.flows.lock().insert(flow_id.clone(), flow);
        if let Some(old) = replaced {
            if !Arc::ptr_eq(&old.process, &process) {
                tracing::info!(flow_id = %flow_id, "replacing login flow");
                old.process.terminate();
            }
        }
        deadline
    }

    /// Remove and terminate every flow older than `ttl`.
    pub fn sweep(&self, ttl: Duration, now: Instant) -> Vec<FlowId> {
        let expired: Vec<(FlowId, LoginFlow)> = {
            let mut flows = self.flows.lock();
            let ids: Vec<FlowId> =
                flows.iter().filter(|(_, f)| f.is_expired(ttl, now)).map(|(id, _)| id.clone()).collect();
            ids.into_iter().filter_map(|id| flows.remove(&id).map(|f| (id, f))).collect()
        };
        expired
            .into_iter()
            .map(|(id, flow)| {
                tracing::info!(flow_id = %id, pid = ?flow.process.pid(), "login flow expired");
                flow.process.terminate();
                id
            })
            .collect()
    }

    /// Atomically remove and return a flow; a flow can be completed once.
    pub fn pop(&self, flow_id: &FlowId) -> Option<LoginFlow> {
        self.flows.lock().remove(flow_id)
    }

    pub fn get(&self, flow_id: &FlowId) -> Option<Arc<dyn FlowProcess>> {
        self.flows.lock().get(flow_id).map(|f| Arc::clone(&f.process))
    }

    /// Process and token baseline of a live flow.
    pub fn snapshot(&self, flow_id: &FlowId) -> Option<(Arc<dyn FlowProcess>, TokenBaseline)> {
        self.flows.lock().get(flow_id).map(|f| (Arc::clone(&f.process), f.token_baseline))
    }

    pub fn contains(&self, flow_id: &FlowId) -> bool {
        self.flows.lock().contains_key(flow_id)
    }

    /// Remove every flow, e.g. at shutdown.
    pub fn drain(&self) -> Vec<(FlowId, LoginFlow)> {
        self.flows.lock().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.flows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
