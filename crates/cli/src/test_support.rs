// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: builders, fakes, and assertion helpers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::{Config, TerminalFileConfig, TerminalSettings};
use crate::host::HostProcess;
use crate::pty::{ExitStatus, ProcessEvent, ProcessHandle, SpawnSpec, Spawned, Spawner, TermSize};
use crate::session::{ClientEvent, SessionManager};
use crate::transport::AppState;

/// How long test helpers wait for an asynchronous event before giving up.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Terminal settings for tests: access enabled, small queues, `/bin/sh`.
pub fn test_settings() -> TerminalSettings {
    Config::test().terminal_settings(&TerminalFileConfig::default())
}

/// An in-memory [`Spawner`] that hands out [`FakeProcess`]es and remembers them.
#[derive(Default)]
pub struct FakeSpawner {
    spawned: Mutex<Vec<Arc<FakeProcess>>>,
    fail: AtomicBool,
    next_pid: AtomicU32,
}

impl FakeSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { next_pid: AtomicU32::new(1000), ..Default::default() })
    }

    /// Make subsequent spawns fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::Release);
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().len()
    }

    pub fn spawned(&self) -> Vec<Arc<FakeProcess>> {
        self.spawned.lock().clone()
    }

    /// The most recently spawned process.
    pub fn last(&self) -> anyhow::Result<Arc<FakeProcess>> {
        self.spawned.lock().last().cloned().ok_or_else(|| anyhow::anyhow!("nothing spawned"))
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, spec: &SpawnSpec) -> anyhow::Result<Spawned> {
        if self.fail.load(Ordering::Acquire) {
            anyhow::bail!("exec {} failed: No such file or directory", spec.shell);
        }
        let (events_tx, events) = mpsc::channel(256);
        let process = Arc::new(FakeProcess {
            pid: self.next_pid.fetch_add(1, Ordering::Relaxed),
            spec: spec.clone(),
            events_tx: Mutex::new(Some(events_tx)),
            writes: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            kills: Mutex::new(Vec::new()),
            exited: AtomicBool::new(false),
        });
        self.spawned.lock().push(Arc::clone(&process));
        Ok(Spawned { handle: process, events })
    }
}

/// A process whose output and exit are driven by the test.
///
/// Killing it behaves like a real shell receiving the signal: it exits with
/// that signal and reports the exit on its event channel.
pub struct FakeProcess {
    pid: u32,
    spec: SpawnSpec,
    events_tx: Mutex<Option<mpsc::Sender<ProcessEvent>>>,
    writes: Mutex<Vec<u8>>,
    resizes: Mutex<Vec<TermSize>>,
    kills: Mutex<Vec<Signal>>,
    exited: AtomicBool,
}

impl FakeProcess {
    pub fn spec(&self) -> &SpawnSpec {
        &self.spec
    }

    /// Emit output as if the shell printed `text`.
    pub async fn emit(&self, text: &str) -> anyhow::Result<()> {
        let tx = self.events_tx.lock().clone();
        let tx = tx.ok_or_else(|| anyhow::anyhow!("process {} has exited", self.pid))?;
        tx.send(ProcessEvent::Data(text.to_owned()))
            .await
            .map_err(|_| anyhow::anyhow!("nobody is listening to process {}", self.pid))
    }

    /// End the process with `code`, as if the shell ran `exit <code>`.
    pub async fn exit(&self, code: i32) -> anyhow::Result<()> {
        self.exited.store(true, Ordering::Release);
        let tx = self.events_tx.lock().take();
        let tx = tx.ok_or_else(|| anyhow::anyhow!("process {} already exited", self.pid))?;
        tx.send(ProcessEvent::Exit(ExitStatus { code: Some(code), signal: None }))
            .await
            .map_err(|_| anyhow::anyhow!("nobody is listening to process {}", self.pid))
    }

    /// Everything written to the process, as text.
    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.writes.lock()).into_owned()
    }

    pub fn resizes(&self) -> Vec<TermSize> {
        self.resizes.lock().clone()
    }

    pub fn kills(&self) -> Vec<Signal> {
        self.kills.lock().clone()
    }

    pub fn is_killed(&self) -> bool {
        !self.kills.lock().is_empty()
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }
}

impl ProcessHandle for FakeProcess {
    fn write(&self, data: &[u8]) -> anyhow::Result<()> {
        if self.has_exited() {
            anyhow::bail!("process {} has exited", self.pid);
        }
        self.writes.lock().extend_from_slice(data);
        Ok(())
    }

    fn resize(&self, size: TermSize) -> anyhow::Result<()> {
        if !size.is_valid() {
            anyhow::bail!("invalid terminal size {size}");
        }
        self.resizes.lock().push(size);
        Ok(())
    }

    fn kill(&self, signal: Signal) -> anyhow::Result<()> {
        if self.exited.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.kills.lock().push(signal);
        if let Some(tx) = self.events_tx.lock().take() {
            let status = ExitStatus { code: None, signal: Some(signal as i32) };
            let _ = tx.try_send(ProcessEvent::Exit(status));
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }
}

/// Builder for constructing `AppState` in tests with sensible defaults.
pub struct AppStateBuilder {
    settings: TerminalSettings,
    spawner: Arc<dyn Spawner>,
    host: Option<Arc<HostProcess>>,
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self { settings: test_settings(), spawner: FakeSpawner::new(), host: None }
    }

    pub fn enabled(mut self, on: bool) -> Self {
        self.settings.enabled = on;
        self
    }

    pub fn persistence(mut self, on: bool) -> Self {
        self.settings.persistence = on;
        self
    }

    pub fn show_warning(mut self, on: bool) -> Self {
        self.settings.show_warning = on;
        self
    }

    pub fn buffer_size(mut self, n: usize) -> Self {
        self.settings.buffer_size = n;
        self
    }

    pub fn client_queue(mut self, n: usize) -> Self {
        self.settings.client_queue = n;
        self
    }

    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn host(mut self, host: Arc<HostProcess>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn settings(&self) -> &TerminalSettings {
        &self.settings
    }

    pub fn manager(self) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(self.settings, self.spawner))
    }

    pub fn build(self) -> Arc<AppState> {
        let host = self.host.clone();
        Arc::new(AppState::new(self.manager(), host))
    }
}

/// Receive the next event or fail after [`EVENT_TIMEOUT`].
pub async fn next_event(rx: &mut mpsc::Receiver<ClientEvent>) -> anyhow::Result<ClientEvent> {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for client event"))?
        .ok_or_else(|| anyhow::anyhow!("client event stream closed"))
}

/// Poll `cond` until it holds or [`EVENT_TIMEOUT`] elapses.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not reached within {EVENT_TIMEOUT:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

/// Extension trait to convert any `Display` error into `anyhow::Error`.
/// Replaces `.map_err(|e| anyhow::anyhow!("{e}"))` with `.anyhow()`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

/// Spawn an HTTP server on a random port for integration testing.
///
/// Returns the bound address and a join handle for the server task.
pub async fn spawn_http_server(
    state: Arc<AppState>,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = crate::transport::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}
