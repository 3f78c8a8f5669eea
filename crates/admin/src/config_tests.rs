// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::AdminConfig;

fn parse(args: &[&str]) -> AdminConfig {
    AdminConfig::parse_from(args)
}

#[test]
fn defaults_validate() -> anyhow::Result<()> {
    let config = parse(&["gwadmin"]);
    config.validate()?;
    assert_eq!(config.port, 80);
    assert_eq!(config.service, "border0-device");
    assert_eq!(config.flow_ttl_secs, 300);
    assert_eq!(config.login_deadline_secs, 120);
    assert_eq!(config.watch_attempts, 60);
    Ok(())
}

#[test]
fn login_timings_follow_flags() {
    let config = parse(&[
        "gwadmin",
        "--flow-ttl-secs",
        "60",
        "--login-deadline-secs",
        "20",
        "--watch-interval-ms",
        "250",
        "--watch-attempts",
        "4",
    ]);
    let timings = config.login_timings();
    assert_eq!(timings.flow_ttl, Duration::from_secs(60));
    assert_eq!(timings.login_deadline, Duration::from_secs(20));
    assert_eq!(timings.watch_interval, Duration::from_millis(250));
    assert_eq!(timings.watch_attempts, 4);
}

#[test]
fn device_state_defaults_next_to_token() {
    let config = parse(&["gwadmin", "--token-path", "/var/lib/agent/client_token"]);
    assert_eq!(config.device_state_path(), PathBuf::from("/var/lib/agent/device.state.yaml"));

    let config = parse(&["gwadmin", "--device-state-path", "/tmp/state.yaml"]);
    assert_eq!(config.device_state_path(), PathBuf::from("/tmp/state.yaml"));
}

#[yare::parameterized(
    empty_cli       = { &["gwadmin", "--agent-cli", " "], "--agent-cli" },
    zero_attempts   = { &["gwadmin", "--watch-attempts", "0"], "--watch-attempts" },
    deadline_gt_ttl = { &["gwadmin", "--login-deadline-secs", "400"], "must not exceed" },
    bad_log_format  = { &["gwadmin", "--log-format", "xml"], "invalid log format" },
)]
fn invalid_config(args: &[&str], expected_substr: &str) {
    let config = parse(args);
    crate::assert_err_contains!(config.validate(), expected_substr);
}
