// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::{Buf, Bytes};
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::decode::Utf8Decoder;
use super::nbio::{is_hangup, read_chunk, set_nonblocking, write_some, PtyFd};
use super::{ExitStatus, ProcessEvent, ProcessHandle, SpawnSpec, Spawned, Spawner, TermSize};

/// Capacity of the per-process event queue. A slow listener stalls pty reads
/// rather than growing memory.
const EVENT_QUEUE: usize = 256;

const READ_CHUNK: usize = 8192;

/// How long a dropped shell has to exit after SIGHUP before SIGKILL.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// [`Spawner`] backed by `forkpty`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSpawner;

impl Spawner for NativeSpawner {
    fn spawn(&self, spec: &SpawnSpec) -> anyhow::Result<Spawned> {
        let (pty, events) = NativePty::spawn(spec)?;
        Ok(Spawned { handle: Arc::new(pty), events })
    }
}

/// A shell running on its own pty.
///
/// Reads, writes, and reaping happen on a background task. The handle only
/// queues input and signals the process group.
pub struct NativePty {
    master: Arc<AsyncFd<PtyFd>>,
    child_pid: Pid,
    input_tx: mpsc::UnboundedSender<Bytes>,
    exited: Arc<AtomicBool>,
}

impl NativePty {
    /// Fork a child on a new pty and exec the shell described by `spec`.
    // forkpty requires unsafe: post-fork child is partially initialized
    #[allow(unsafe_code)]
    pub fn spawn(spec: &SpawnSpec) -> anyhow::Result<(Self, mpsc::Receiver<ProcessEvent>)> {
        if !spec.size.is_valid() {
            bail!("invalid terminal size {}", spec.size);
        }
        if let Some(ref cwd) = spec.cwd {
            if !cwd.is_dir() {
                bail!("working directory does not exist: {}", cwd.display());
            }
        }

        // Build argv before forking so the child only execs.
        let mut argv = Vec::with_capacity(spec.args.len() + 1);
        argv.push(CString::new(spec.shell.as_bytes()).context("invalid shell path")?);
        for arg in &spec.args {
            argv.push(CString::new(arg.as_bytes()).context("invalid shell argument")?);
        }

        let winsize =
            Winsize { ws_col: spec.size.cols, ws_row: spec.size.rows, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. We immediately exec.
        let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                // SAFETY: restoring the default SIGPIPE disposition in the
                // post-fork child before exec; tokio sets it to SIG_IGN.
                unsafe {
                    let _ = nix::sys::signal::signal(Signal::SIGPIPE, SigHandler::SigDfl);
                }
                if let Some(ref cwd) = spec.cwd {
                    let _ = std::env::set_current_dir(cwd);
                }
                std::env::set_var("TERM", "xterm-256color");
                for (key, val) in &spec.env {
                    std::env::set_var(key, val);
                }

                let _ = execvp(&argv[0], &argv);
                // SAFETY: exec failed; leave the child without running any
                // of the parent's atexit handlers or destructors.
                unsafe { nix::libc::_exit(127) }
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master)?;
                let master =
                    Arc::new(AsyncFd::new(PtyFd(master)).context("AsyncFd::new failed")?);
                let (input_tx, input_rx) = mpsc::unbounded_channel();
                let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
                let exited = Arc::new(AtomicBool::new(false));

                debug!(pid = child.as_raw(), shell = %spec.shell, size = %spec.size, "spawned shell");
                tokio::spawn(run_io(
                    Arc::clone(&master),
                    child,
                    input_rx,
                    events_tx,
                    Arc::clone(&exited),
                ));

                Ok((Self { master, child_pid: child, input_tx, exited }, events_rx))
            }
        }
    }
}

impl ProcessHandle for NativePty {
    fn write(&self, data: &[u8]) -> anyhow::Result<()> {
        if self.exited.load(Ordering::Acquire) {
            bail!("process {} has exited", self.child_pid);
        }
        self.input_tx
            .send(Bytes::copy_from_slice(data))
            .map_err(|_| anyhow::anyhow!("pty writer for {} is closed", self.child_pid))
    }

    fn resize(&self, size: TermSize) -> anyhow::Result<()> {
        if !size.is_valid() {
            bail!("invalid terminal size {size}");
        }
        let ws = rustix::termios::Winsize {
            ws_col: size.cols,
            ws_row: size.rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        rustix::termios::tcsetwinsize(self.master.get_ref(), ws)
            .context("TIOCSWINSZ ioctl failed")?;
        Ok(())
    }

    fn kill(&self, signal: Signal) -> anyhow::Result<()> {
        // A reaped pid may already belong to someone else.
        if self.exited.load(Ordering::Acquire) {
            return Ok(());
        }
        // forkpty puts the child in its own session, so its pid is also the
        // process group id. Signal the group to reach grandchildren.
        kill(Pid::from_raw(-self.child_pid.as_raw()), signal)
            .with_context(|| format!("kill({}, {signal}) failed", self.child_pid))?;
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.child_pid.as_raw() as u32)
    }
}

impl Drop for NativePty {
    fn drop(&mut self) {
        if self.exited.load(Ordering::Acquire) {
            return;
        }
        // Hang up the group; the I/O task sees EOF and reaps the child.
        let _ = ProcessHandle::kill(self, Signal::SIGHUP);

        // A shell that ignores SIGHUP gets SIGKILL after a short grace.
        let pid = self.child_pid;
        let exited = Arc::clone(&self.exited);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(KILL_GRACE).await;
                    kill_group_if_running(pid, &exited);
                });
            }
            Err(_) => kill_group_if_running(pid, &exited),
        }
    }
}

fn kill_group_if_running(pid: Pid, exited: &AtomicBool) {
    if exited.load(Ordering::Acquire) {
        return;
    }
    warn!(pid = pid.as_raw(), "shell ignored SIGHUP, sending SIGKILL");
    let _ = kill(Pid::from_raw(-pid.as_raw()), Signal::SIGKILL);
}

/// Pump pty output into `events_tx` and queued input into the pty until the
/// child side closes, then reap the child and report its exit.
async fn run_io(
    master: Arc<AsyncFd<PtyFd>>,
    pid: Pid,
    mut input_rx: mpsc::UnboundedReceiver<Bytes>,
    events_tx: mpsc::Sender<ProcessEvent>,
    exited: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut decoder = Utf8Decoder::default();
    let mut input_open = true;
    // Once nobody listens, keep draining so the child never blocks on output.
    let mut listening = true;
    // Input not yet accepted by the pty. Output keeps being read meanwhile,
    // otherwise a child echoing a large paste blocks and never reads more.
    let mut pending = Bytes::new();

    loop {
        tokio::select! {
            result = read_chunk(&master, &mut buf) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = decoder.decode(&buf[..n]);
                        if listening && !text.is_empty()
                            && events_tx.send(ProcessEvent::Data(text)).await.is_err()
                        {
                            listening = false;
                        }
                    }
                    Err(e) if is_hangup(&e) => break,
                    Err(e) => {
                        warn!(pid = pid.as_raw(), "pty read failed: {e}");
                        break;
                    }
                }
            }
            input = input_rx.recv(), if input_open && pending.is_empty() => {
                match input {
                    Some(data) => pending = data,
                    None => input_open = false,
                }
            }
            written = write_some(&master, &pending), if !pending.is_empty() => {
                match written {
                    Ok(n) => pending.advance(n),
                    Err(e) if is_hangup(&e) => break,
                    Err(e) => {
                        warn!(pid = pid.as_raw(), dropped = pending.len(), "pty write failed: {e}");
                        pending.clear();
                    }
                }
            }
        }
    }

    let tail = decoder.finish();
    if listening && !tail.is_empty() {
        let _ = events_tx.send(ProcessEvent::Data(tail)).await;
    }

    let status = match tokio::task::spawn_blocking(move || wait_for_exit(pid)).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            warn!(pid = pid.as_raw(), "{e:#}");
            ExitStatus { code: None, signal: None }
        }
        Err(e) => {
            warn!(pid = pid.as_raw(), "reaper task failed: {e}");
            ExitStatus { code: None, signal: None }
        }
    };
    exited.store(true, Ordering::Release);
    debug!(pid = pid.as_raw(), code = ?status.code, signal = ?status.signal, "shell exited");
    let _ = events_tx.send(ProcessEvent::Exit(status)).await;
}

/// Block until the child exits and convert to our `ExitStatus`.
fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus { code: Some(code), signal: None });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) });
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => bail!("waitpid failed: {e}"),
        }
    }
}
