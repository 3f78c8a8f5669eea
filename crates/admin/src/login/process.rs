// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};

use crate::service::run_with_timeout;

/// SIGTERM-to-SIGKILL grace for login processes.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Liveness of a login process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited(i32),
    Signaled,
}

/// Handle to the process behind a login flow.
pub trait FlowProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;
    fn status(&self) -> ProcessStatus;
    /// SIGTERM the process group.
    fn terminate(&self);
    /// SIGKILL the process group.
    fn kill(&self);
}

/// How to invoke the agent's interactive login.
#[derive(Debug, Clone)]
pub struct LoginCommand {
    pub cli: String,
    /// Administrative user the agent runs as; the token lands under its home.
    pub user: String,
    pub home: PathBuf,
}

impl LoginCommand {
    /// `pkill -f` pattern matching any login started by this command.
    pub fn match_pattern(&self) -> String {
        format!("{} client login", self.cli)
    }

    fn command(&self, org: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.cli);
        cmd.args(["client", "login", "--org", org])
            .env("SHELL", "/bin/bash")
            .env("LOGNAME", &self.user)
            .env("USER", &self.user)
            .env("HOME", &self.home)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Own process group so the whole tree can be signalled at once.
            .process_group(0)
            .kill_on_drop(true);
        cmd
    }
}

/// Best-effort kill of any login process left by a previous attempt.
///
/// Not flow-scoped: a new login attempt always wins.
pub async fn kill_stale_logins(command: &LoginCommand) {
    let pattern = command.match_pattern();
    match run_with_timeout("pkill", &["-f", pattern.as_str()], Duration::from_secs(5)).await {
        // pkill exits 1 when nothing matched.
        Ok(out) if out.status.code() == Some(0) => {
            tracing::info!(pattern = %pattern, "killed stale login process");
        }
        Ok(_) => {}
        Err(e) => tracing::debug!(err = %e, "pkill unavailable"),
    }
}

/// A spawned `client login` process.
pub struct AgentProcess {
    pid: Option<u32>,
    child: Mutex<Child>,
}

impl AgentProcess {
    /// Spawn the login for `org` in its own process group.
    pub fn spawn(command: &LoginCommand, org: &str) -> std::io::Result<(Self, OutputLines)> {
        let mut child = command.command(org).spawn()?;
        let stdout =
            child.stdout.take().ok_or_else(|| std::io::Error::other("stdout not captured"))?;
        let stderr =
            child.stderr.take().ok_or_else(|| std::io::Error::other("stderr not captured"))?;
        let pid = child.id();
        tracing::debug!(pid = ?pid, cli = %command.cli, "spawned login process");
        Ok((Self { pid, child: Mutex::new(child) }, OutputLines::new(stdout, stderr)))
    }
}

impl FlowProcess for AgentProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn status(&self) -> ProcessStatus {
        match self.child.lock().try_wait() {
            Ok(Some(status)) => match status.code() {
                Some(code) => ProcessStatus::Exited(code),
                None => ProcessStatus::Signaled,
            },
            Ok(None) => ProcessStatus::Running,
            Err(e) => {
                tracing::warn!(pid = ?self.pid, err = %e, "try_wait failed");
                ProcessStatus::Running
            }
        }
    }

    fn terminate(&self) {
        signal_group(self.pid, Signal::SIGTERM);
    }

    fn kill(&self) {
        signal_group(self.pid, Signal::SIGKILL);
    }
}

/// The child is its own group leader, so its PID is the process group ID.
fn signal_group(pid: Option<u32>, signal: Signal) {
    let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) => tracing::debug!(pgid, ?signal, "signalled login process group"),
        Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pgid, ?signal, err = %e, "failed to signal login process group"),
    }
}

/// Terminate a login process, escalating to SIGKILL after `grace`.
pub async fn shutdown_process(process: &dyn FlowProcess, grace: Duration) -> ProcessStatus {
    process.terminate();
    let status = wait_for_exit(process, grace).await;
    if status == ProcessStatus::Running {
        tracing::warn!(pid = ?process.pid(), "login process ignored SIGTERM, killing");
        process.kill();
    }
    status
}

/// Poll until the process leaves `Running` or `timeout` elapses.
pub async fn wait_for_exit(process: &dyn FlowProcess, timeout: Duration) -> ProcessStatus {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = process.status();
        if status != ProcessStatus::Running || tokio::time::Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// One output pipe read as lossily decoded lines.
struct PipeLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    done: bool,
}

impl<R: AsyncRead + Unpin> PipeLines<R> {
    fn new(inner: R) -> Self {
        Self { reader: BufReader::new(inner), buf: Vec::new(), done: false }
    }

    /// Next line, or `None` at EOF or on a read error.
    ///
    /// Cancel-safe: bytes of a partially read line stay in `buf` and the next
    /// call continues the same line.
    async fn next(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) => {
                self.done = true;
                (!self.buf.is_empty()).then(|| self.take_line())
            }
            Ok(_) => Some(self.take_line()),
            Err(e) => {
                tracing::debug!(err = %e, "login output read failed");
                self.done = true;
                (!self.buf.is_empty()).then(|| self.take_line())
            }
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf).trim_end_matches(['\n', '\r']).to_owned();
        self.buf.clear();
        line
    }
}

/// Interleaved stdout and stderr lines of a login process, with a transcript
/// of what was consumed so far.
pub struct OutputLines {
    stdout: PipeLines<ChildStdout>,
    stderr: PipeLines<ChildStderr>,
    transcript: Vec<String>,
}

impl OutputLines {
    pub(crate) fn new(stdout: ChildStdout, stderr: ChildStderr) -> Self {
        Self { stdout: PipeLines::new(stdout), stderr: PipeLines::new(stderr), transcript: Vec::new() }
    }

    /// Next line from either stream; `None` once both reach EOF.
    ///
    /// Bytes that are not UTF-8 are replaced rather than ending the stream.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            if self.stdout.done && self.stderr.done {
                return None;
            }
            tokio::select! {
                line = self.stdout.next(), if !self.stdout.done => {
                    if line.is_some() {
                        return line;
                    }
                }
                line = self.stderr.next(), if !self.stderr.done => {
                    if line.is_some() {
                        return line;
                    }
                }
            }
        }
    }

    /// Read lines into the transcript until `find` matches one.
    pub async fn scan<F>(&mut self, mut find: F) -> Option<String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        while let Some(line) = self.next_line().await {
            let found = find(&line);
            self.transcript.push(line);
            if found.is_some() {
                return found;
            }
        }
        None
    }

    pub fn transcript(&self) -> String {
        self.transcript.join("\n")
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
