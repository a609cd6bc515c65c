// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process handle capability: a shell running on a pseudo-terminal.

pub mod decode;
pub mod nbio;
pub mod spawn;

use std::path::PathBuf;
use std::sync::Arc;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Both dimensions must be non-zero for a pty to accept them.
    pub fn is_valid(&self) -> bool {
        self.cols > 0 && self.rows > 0
    }
}

impl std::fmt::Display for TermSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Single numeric exit code as reported to clients.
    ///
    /// Signal deaths map to the shell convention `128 + signal`.
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => 1,
        }
    }
}

/// Events emitted by a running process, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Data(String),
    Exit(ExitStatus),
}

/// What to run and how.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub shell: String,
    pub args: Vec<String>,
    pub size: TermSize,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

/// Control surface of a spawned process. Output and exit arrive separately on
/// the event receiver returned by [`Spawner::spawn`].
pub trait ProcessHandle: Send + Sync + 'static {
    fn write(&self, data: &[u8]) -> anyhow::Result<()>;

    fn resize(&self, size: TermSize) -> anyhow::Result<()>;

    fn kill(&self, signal: Signal) -> anyhow::Result<()>;

    fn pid(&self) -> Option<u32>;
}

/// A freshly spawned process.
///
/// `events` has exactly one consumer: whoever takes it is the process's only
/// output listener.
pub struct Spawned {
    pub handle: Arc<dyn ProcessHandle>,
    pub events: mpsc::Receiver<ProcessEvent>,
}

impl std::fmt::Debug for Spawned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawned").field("pid", &self.handle.pid()).finish_non_exhaustive()
    }
}

/// Capability to start shells. Must be called from within a tokio runtime.
pub trait Spawner: Send + Sync + 'static {
    fn spawn(&self, spec: &SpawnSpec) -> anyhow::Result<Spawned>;
}
