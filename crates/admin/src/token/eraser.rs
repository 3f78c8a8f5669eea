// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::persist;
use crate::token::TokenStore;

/// Deletes the token file after a grace delay once a session is established.
///
/// Downstream consumers (the device service) read the token after login.
/// On a device's first activation they need longer to notice it, so the
/// delay is `first_delay` until the breadcrumb file exists and `delay` after.
pub struct DeferredTokenEraser {
    tokens: Arc<TokenStore>,
    breadcrumb_path: PathBuf,
    first_delay: Duration,
    delay: Duration,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

/// A scheduled erase.
pub struct EraseTicket {
    pub delay: Duration,
    /// Resolves to whether a token file was removed.
    pub handle: JoinHandle<bool>,
}

impl DeferredTokenEraser {
    pub fn new(
        tokens: Arc<TokenStore>,
        breadcrumb_path: PathBuf,
        first_delay: Duration,
        delay: Duration,
        tasks: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self { tokens, breadcrumb_path, first_delay, delay, tasks, shutdown }
    }

    pub fn is_first_login(&self) -> bool {
        !self.breadcrumb_path.exists()
    }

    /// Delay the next [`schedule`](Self::schedule) call would use.
    pub fn next_delay(&self) -> Duration {
        if self.is_first_login() {
            self.first_delay
        } else {
            self.delay
        }
    }

    /// Schedule deletion for a completed login and record the breadcrumb.
    pub fn schedule(&self) -> EraseTicket {
        let delay = self.next_delay();
        if self.is_first_login() {
            let stamp = format!("{}\n", crate::state::epoch_ms());
            if let Err(e) = persist::write_atomic(&self.breadcrumb_path, stamp.as_bytes()) {
                tracing::warn!(path = %self.breadcrumb_path.display(), err = %e, "failed to record first login");
            }
        }
        self.erase_after(delay)
    }

    /// Delete the token file after `delay` without blocking the caller.
    ///
    /// Shutdown before the delay elapses leaves the token in place.
    pub fn erase_after(&self, delay: Duration) -> EraseTicket {
        let tokens = Arc::clone(&self.tokens);
        let shutdown = self.shutdown.clone();
        let handle = self.tasks.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("shutdown before deferred token erase");
                    return false;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            match tokens.remove_token() {
                Ok(removed) => {
                    if removed {
                        tracing::info!(path = %tokens.token_path().display(), "token erased");
                    }
                    removed
                }
                Err(e) => {
                    tracing::warn!(err = %e, "deferred token erase failed");
                    false
                }
            }
        });
        EraseTicket { delay, handle }
    }
}

#[cfg(test)]
#[path = "eraser_tests.rs"]
mod tests;
