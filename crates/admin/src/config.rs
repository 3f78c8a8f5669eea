// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::login::LoginTimings;

/// Local administration console for the gateway appliance.
#[derive(Debug, Clone, Parser)]
#[command(name = "gwadmin", version, about)]
pub struct AdminConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "GWADMIN_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 80, env = "GWADMIN_PORT")]
    pub port: u16,

    /// Username for the local password login.
    #[arg(long, default_value = "admin", env = "GWADMIN_ADMIN_USERNAME")]
    pub admin_username: String,

    /// Password for the local password login.
    #[arg(long, default_value = "password", env = "GWADMIN_ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: String,

    /// Path to the VPN agent CLI binary.
    #[arg(long, default_value = "border0", env = "GWADMIN_AGENT_CLI")]
    pub agent_cli: String,

    /// Organization override. Takes precedence over the persisted org file.
    #[arg(long, env = "GWADMIN_ORG")]
    pub org: Option<String>,

    /// Bearer token file written by the agent after login.
    #[arg(long, default_value = "/root/.border0/client_token", env = "GWADMIN_TOKEN_PATH")]
    pub token_path: PathBuf,

    /// Decoded claims cache for the token.
    #[arg(
        long,
        default_value = "/root/.border0/client_token.meta.json",
        env = "GWADMIN_TOKEN_METADATA_PATH"
    )]
    pub token_metadata_path: PathBuf,

    /// Persisted organization binding.
    #[arg(long, default_value = "/root/.border0/org", env = "GWADMIN_ORG_PATH")]
    pub org_path: PathBuf,

    /// Agent device-state cache, removed on org reset.
    /// Defaults to `device.state.yaml` next to the token file.
    #[arg(long, env = "GWADMIN_DEVICE_STATE_PATH")]
    pub device_state_path: Option<PathBuf>,

    /// Breadcrumb marking that this device has completed a login before.
    #[arg(long, default_value = "/etc/border0/first_login.done", env = "GWADMIN_BREADCRUMB_PATH")]
    pub breadcrumb_path: PathBuf,

    /// Result of the last agent version check.
    #[arg(long, default_value = "/etc/border0/version_cache.json", env = "GWADMIN_VERSION_CACHE_PATH")]
    pub version_cache_path: PathBuf,

    /// Plain-text source of the latest published agent version. Empty disables the lookup.
    #[arg(
        long,
        default_value = "https://download.border0.com/latest_version.txt",
        env = "GWADMIN_LATEST_VERSION_URL"
    )]
    pub latest_version_url: String,

    /// Dependent systemd unit restarted once a token is available.
    #[arg(long, default_value = "border0-device", env = "GWADMIN_SERVICE")]
    pub service: String,

    /// User the agent login process runs as (LOGNAME/USER).
    #[arg(long, default_value = "root", env = "GWADMIN_AGENT_USER")]
    pub agent_user: String,

    /// HOME for the agent login process; the agent writes its token below it.
    #[arg(long, default_value = "/root", env = "GWADMIN_AGENT_HOME")]
    pub agent_home: PathBuf,

    /// Seconds before an unfinished login flow is swept.
    #[arg(long, default_value_t = 300, env = "GWADMIN_FLOW_TTL_SECS")]
    pub flow_ttl_secs: u64,

    /// Seconds before a login process is terminated.
    #[arg(long, default_value_t = 120, env = "GWADMIN_LOGIN_DEADLINE_SECS")]
    pub login_deadline_secs: u64,

    /// Seconds to wait for the agent to print a login URL.
    #[arg(long, default_value_t = 30, env = "GWADMIN_URL_TIMEOUT_SECS")]
    pub url_timeout_secs: u64,

    /// Token watcher poll interval in milliseconds.
    #[arg(long, default_value_t = 2000, env = "GWADMIN_WATCH_INTERVAL_MS")]
    pub watch_interval_ms: u64,

    /// Token watcher attempts before giving up.
    #[arg(long, default_value_t = 60, env = "GWADMIN_WATCH_ATTEMPTS")]
    pub watch_attempts: u32,

    /// Token erase delay before the first recorded login on this device.
    #[arg(long, default_value_t = 30, env = "GWADMIN_ERASE_FIRST_DELAY_SECS")]
    pub erase_first_delay_secs: u64,

    /// Token erase delay after the first login.
    #[arg(long, default_value_t = 10, env = "GWADMIN_ERASE_DELAY_SECS")]
    pub erase_delay_secs: u64,

    /// Mark cookies `Secure` (enable when served behind TLS).
    #[arg(long, env = "GWADMIN_SECURE_COOKIES")]
    pub secure_cookies: bool,

    /// Log format (json or text).
    #[arg(long, env = "GWADMIN_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "GWADMIN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl AdminConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent_cli.trim().is_empty() {
            anyhow::bail!("--agent-cli must not be empty");
        }
        if self.watch_attempts == 0 {
            anyhow::bail!("--watch-attempts must be at least 1");
        }
        if self.login_deadline_secs > self.flow_ttl_secs {
            anyhow::bail!(
                "--login-deadline-secs ({}) must not exceed --flow-ttl-secs ({})",
                self.login_deadline_secs,
                self.flow_ttl_secs
            );
        }
        match self.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => anyhow::bail!("invalid log format: {other}"),
        }
    }

    pub fn device_state_path(&self) -> PathBuf {
        match self.device_state_path {
            Some(ref path) => path.clone(),
            None => self.token_path.with_file_name("device.state.yaml"),
        }
    }

    pub fn login_timings(&self) -> LoginTimings {
        LoginTimings {
            flow_ttl: Duration::from_secs(self.flow_ttl_secs),
            login_deadline: Duration::from_secs(self.login_deadline_secs),
            url_timeout: Duration::from_secs(self.url_timeout_secs),
            watch_interval: Duration::from_millis(self.watch_interval_ms),
            watch_attempts: self.watch_attempts,
        }
    }

    pub fn erase_first_delay(&self) -> Duration {
        Duration::from_secs(self.erase_first_delay_secs)
    }

    pub fn erase_delay(&self) -> Duration {
        Duration::from_secs(self.erase_delay_secs)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
