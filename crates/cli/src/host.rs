// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor for the bridge host process.
//!
//! The host speaks line-delimited JSON over its stdin/stdout: each request
//! line `{"id", "kind", "payload"}` is answered by a line carrying the same
//! `id` and either a `payload` or an `error`. Other stdout lines are logged.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{coded, ErrorCode};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<HostResponse>>>>;

#[derive(Debug, Serialize)]
struct HostRequest<'a> {
    id: u64,
    kind: &'a str,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct HostResponse {
    id: u64,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// Externally visible state of the host process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
}

/// A running host process and its request/response channel.
pub struct HostProcess {
    pid: Option<u32>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    pending: Pending,
    next_id: AtomicU64,
    /// Cancelled once the process has been reaped.
    exited: CancellationToken,
    exit_code: Arc<Mutex<Option<i32>>>,
    request_timeout: Duration,
    kill_grace: Duration,
}

impl HostProcess {
    /// Start `command` under `sh -c` in its own process group.
    pub fn spawn(
        command: &str,
        request_timeout: Duration,
        kill_grace: Duration,
    ) -> anyhow::Result<Arc<Self>> {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        cmd.process_group(0);
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().with_context(|| format!("failed to start host: {command}"))?;
        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take().context("host stdout was not captured")?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let exited = CancellationToken::new();
        let exit_code = Arc::new(Mutex::new(None));

        info!(pid = ?pid, command, "started host process");
        tokio::spawn(read_responses(stdout, Arc::clone(&pending)));
        tokio::spawn(reap(child, Arc::clone(&pending), exited.clone(), Arc::clone(&exit_code)));

        Ok(Arc::new(Self {
            pid,
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            exited,
            exit_code,
            request_timeout,
            kill_grace,
        }))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        !self.exited.is_cancelled()
    }

    pub fn status(&self) -> HostStatus {
        HostStatus { running: self.is_running(), pid: self.pid, exit_code: *self.exit_code.lock() }
    }

    /// Resolves once the host process has been reaped.
    pub async fn exited(&self) {
        self.exited.cancelled().await
    }

    /// Send a request and wait for its answer.
    ///
    /// Fails with [`ErrorCode::Timeout`] when the host does not answer within
    /// the request timeout, and [`ErrorCode::Exited`] when it is gone.
    pub async fn request(
        &self,
        kind: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        if !self.is_running() {
            return Err(coded(ErrorCode::Exited, "host process has exited"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&HostRequest { id, kind, payload })?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(HostResponse { error: Some(message), .. })) => {
                Err(coded(ErrorCode::Internal, format!("host rejected {kind}: {message}")))
            }
            Ok(Ok(response)) => Ok(response.payload),
            Ok(Err(_)) => Err(coded(ErrorCode::Exited, "host process exited before answering")),
            Err(_) => {
                self.pending.lock().remove(&id);
                warn!(id, kind, timeout = ?self.request_timeout, "host request timed out");
                Err(coded(
                    ErrorCode::Timeout,
                    format!("host did not answer {kind} within {:?}", self.request_timeout),
                ))
            }
        }
    }

    async fn write_line(&self, line: &str) -> anyhow::Result<()> {
        let mut stdin = self.stdin.lock().await;
        let Some(writer) = stdin.as_mut() else {
            return Err(coded(ErrorCode::Exited, "host stdin is closed"));
        };
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            *stdin = None;
            return Err(coded(ErrorCode::Exited, format!("writing to host failed: {e}")));
        }
        Ok(())
    }

    /// Stop the host: SIGTERM now, SIGKILL if it is still running after the
    /// grace period. Returns `true` if SIGKILL was needed.
    pub async fn shutdown(&self) -> bool {
        let Some(pid) = self.pid else {
            return false;
        };
        if !self.is_running() {
            return false;
        }
        info!(pid, grace = ?self.kill_grace, "stopping host process");
        signal_group(pid, Signal::SIGTERM);
        let escalation = schedule_kill(pid, self.kill_grace, self.exited.clone());
        let killed = escalation.await.unwrap_or(false);
        if tokio::time::timeout(self.kill_grace, self.exited.cancelled()).await.is_err() {
            warn!(pid, "host process still not reaped after SIGKILL");
        }
        killed
    }
}

impl std::fmt::Debug for HostProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProcess").field("status", &self.status()).finish_non_exhaustive()
    }
}

fn signal_group(pid: u32, signal: Signal) {
    if let Err(e) = kill(Pid::from_raw(-(pid as i32)), signal) {
        debug!(pid, "kill({signal}) failed: {e}");
    }
}

/// SIGKILL the host after `grace` unless `exited` fires first.
fn schedule_kill(pid: u32, grace: Duration, exited: CancellationToken) -> JoinHandle<bool> {
    tokio::spawn(async move {
        tokio::select! {
            _ = exited.cancelled() => false,
            _ = tokio::time::sleep(grace) => {
                warn!(pid, ?grace, "host did not exit after SIGTERM, sending SIGKILL");
                signal_group(pid, Signal::SIGKILL);
                true
            }
        }
    })
}

async fn read_responses(stdout: ChildStdout, pending: Pending) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let response: HostResponse = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(_) => {
                        debug!(line, "host output");
                        continue;
                    }
                };
                match pending.lock().remove(&response.id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(id = response.id, "host answered an expired request"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("reading host output failed: {e}");
                break;
            }
        }
    }
}

async fn reap(
    mut child: Child,
    pending: Pending,
    exited: CancellationToken,
    exit_code: Arc<Mutex<Option<i32>>>,
) {
    match child.wait().await {
        Ok(status) => {
            *exit_code.lock() = status.code();
            info!(code = ?status.code(), "host process exited");
        }
        Err(e) => warn!("waiting for host process failed: {e}"),
    }
    // Dropping the senders fails every outstanding request.
    pending.lock().clear();
    exited.cancel();
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
