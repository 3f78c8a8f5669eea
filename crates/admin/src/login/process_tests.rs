// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;
use std::time::Duration;

use super::*;
use crate::test_support::write_script;

fn login_command(dir: &Path, body: &str) -> anyhow::Result<LoginCommand> {
    let cli = write_script(dir, "agent", body)?;
    Ok(LoginCommand {
        cli: cli.to_string_lossy().into_owned(),
        user: "gwtest".to_owned(),
        home: dir.join("home"),
    })
}

#[tokio::test]
async fn passes_org_and_pinned_environment() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let command = login_command(dir.path(), "echo \"$1 $2 $3 $4\"\necho \"$USER $LOGNAME $HOME $SHELL\"\n")?;

    let (process, mut lines) = AgentProcess::spawn(&command, "acme")?;
    assert_eq!(lines.next_line().await.as_deref(), Some("client login --org acme"));
    let home = dir.path().join("home");
    assert_eq!(
        lines.next_line().await,
        Some(format!("gwtest gwtest {} /bin/bash", home.display()))
    );
    assert_eq!(lines.next_line().await, None);
    assert_eq!(wait_for_exit(&process, Duration::from_secs(5)).await, ProcessStatus::Exited(0));
    Ok(())
}

#[tokio::test]
async fn reports_exit_code() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let command = login_command(dir.path(), "exit 3\n")?;
    let (process, _lines) = AgentProcess::spawn(&command, "acme")?;
    assert_eq!(wait_for_exit(&process, Duration::from_secs(5)).await, ProcessStatus::Exited(3));
    // Status stays stable after the exit has been observed.
    assert_eq!(process.status(), ProcessStatus::Exited(3));
    Ok(())
}

#[tokio::test]
async fn stderr_lines_are_interleaved_and_scanned() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let command = login_command(dir.path(), "echo 'error: no such org' >&2\nexit 1\n")?;
    let (_process, mut lines) = AgentProcess::spawn(&command, "acme")?;

    let found = lines.scan(|line| line.contains("http").then(|| line.to_owned())).await;
    assert_eq!(found, None);
    assert_eq!(lines.transcript(), "error: no such org");
    Ok(())
}

#[tokio::test]
async fn invalid_utf8_does_not_end_the_stream() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let command = login_command(
        dir.path(),
        "printf 'Caf\\351 login\\n'\necho 'Please visit https://sso.example/abc123'\nprintf 'no newline'\n",
    )?;
    let (_process, mut lines) = AgentProcess::spawn(&command, "acme")?;

    let found = lines.scan(|line| line.contains("https://").then(|| line.to_owned())).await;
    assert_eq!(found.as_deref(), Some("Please visit https://sso.example/abc123"));
    assert_eq!(lines.transcript(), "Caf\u{fffd} login\nPlease visit https://sso.example/abc123");
    assert_eq!(lines.next_line().await.as_deref(), Some("no newline"));
    assert_eq!(lines.next_line().await, None);
    Ok(())
}

#[tokio::test]
async fn terminate_signals_whole_group() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    // The grandchild keeps stdout open; only a group signal lets EOF arrive.
    let command = login_command(dir.path(), "sleep 30 &\necho ready\nwait\n")?;
    let (process, mut lines) = AgentProcess::spawn(&command, "acme")?;
    assert_eq!(lines.next_line().await.as_deref(), Some("ready"));
    assert_eq!(process.status(), ProcessStatus::Running);

    process.terminate();
    let eof = tokio::time::timeout(Duration::from_secs(5), lines.next_line()).await?;
    assert_eq!(eof, None);
    assert_eq!(wait_for_exit(&process, Duration::from_secs(5)).await, ProcessStatus::Signaled);
    Ok(())
}

#[tokio::test]
async fn shutdown_escalates_when_sigterm_is_ignored() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let command = login_command(dir.path(), "trap '' TERM\necho ready\nwhile true; do sleep 1; done\n")?;
    let (process, mut lines) = AgentProcess::spawn(&command, "acme")?;
    assert_eq!(lines.next_line().await.as_deref(), Some("ready"));

    let status = shutdown_process(&process, Duration::from_millis(200)).await;
    assert_eq!(status, ProcessStatus::Running);
    assert_eq!(wait_for_exit(&process, Duration::from_secs(5)).await, ProcessStatus::Signaled);
    Ok(())
}

#[tokio::test]
async fn spawn_failure_is_an_io_error() {
    let command = LoginCommand {
        cli: "/nonexistent/gwadmin-agent".to_owned(),
        user: "root".to_owned(),
        home: "/root".into(),
    };
    assert!(AgentProcess::spawn(&command, "acme").is_err());
}

#[test]
fn match_pattern_targets_login_subcommand() {
    let command =
        LoginCommand { cli: "border0".to_owned(), user: "root".to_owned(), home: "/root".into() };
    assert_eq!(command.match_pattern(), "border0 client login");
}
