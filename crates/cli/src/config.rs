// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::pty::{SpawnSpec, TermSize};

/// Buffer size used when neither the flag nor the settings file sets one.
pub const DEFAULT_BUFFER_SIZE: usize = 50_000;

/// Shell used when neither `--shell` nor `$SHELL` is set.
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// Browser terminal back end for the bridge administration dashboard.
#[derive(Debug, Parser)]
#[command(name = "bridgeterm", version, about)]
pub struct Config {
    /// HTTP port to listen on.
    #[arg(long, env = "BRIDGETERM_PORT")]
    pub port: Option<u16>,

    /// Unix socket path for HTTP.
    #[arg(long, env = "BRIDGETERM_SOCKET")]
    pub socket: Option<String>,

    /// Host address to bind to.
    #[arg(long, env = "BRIDGETERM_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Path to the bridge's JSON settings file (terminal keys are read from it).
    #[arg(long, env = "UIX_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    /// Bridge storage directory; default working directory for shells.
    #[arg(long, env = "UIX_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Allow browser terminal sessions at all.
    #[arg(
        long,
        env = "HOMEBRIDGE_CONFIG_UI_TERMINAL",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub enable_terminal: bool,

    /// Share one shell across all browser clients (overrides the settings file).
    #[arg(long, env = "BRIDGETERM_TERMINAL_PERSISTENCE")]
    pub terminal_persistence: Option<bool>,

    /// Maximum bytes of output kept for replay (overrides the settings file).
    #[arg(long, env = "BRIDGETERM_TERMINAL_BUFFER_SIZE")]
    pub terminal_buffer_size: Option<usize>,

    /// Ask before leaving a terminal the user has typed in (overrides the settings file).
    #[arg(long, env = "BRIDGETERM_TERMINAL_SHOW_WARNING")]
    pub terminal_show_warning: Option<bool>,

    /// Shell to spawn.
    #[arg(long, env = "SHELL")]
    pub shell: Option<String>,

    /// Extra argument passed to the shell (repeatable).
    #[arg(long = "shell-arg", allow_hyphen_values = true)]
    pub shell_args: Vec<String>,

    /// Working directory for spawned shells.
    #[arg(long, env = "BRIDGETERM_CWD")]
    pub cwd: Option<PathBuf>,

    /// Terminal columns used when a client does not report its size.
    #[arg(long, env = "BRIDGETERM_COLS", default_value = "80")]
    pub cols: u16,

    /// Terminal rows used when a client does not report its size.
    #[arg(long, env = "BRIDGETERM_ROWS", default_value = "24")]
    pub rows: u16,

    /// Events queued per client before a stalled client is detached.
    #[arg(long, env = "BRIDGETERM_CLIENT_QUEUE", default_value = "1024")]
    pub client_queue: usize,

    /// Command line of the bridge host process to supervise (run via `sh -c`).
    #[arg(long, env = "BRIDGETERM_HOST_COMMAND")]
    pub host_command: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "BRIDGETERM_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "BRIDGETERM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    // -- Duration overrides (skip from CLI; set in Config::test()) --------
    #[clap(skip)]
    pub host_request_timeout_ms: Option<u64>,
    #[clap(skip)]
    pub host_kill_grace_ms: Option<u64>,
    #[clap(skip)]
    pub shutdown_timeout_ms: Option<u64>,
}

fn env_duration_ms(var: &str, default: u64) -> Duration {
    let ms = std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}

macro_rules! duration_field {
    ($method:ident, $field:ident, $env:literal, $default:expr) => {
        pub fn $method(&self) -> Duration {
            match self.$field {
                Some(ms) => Duration::from_millis(ms),
                None => env_duration_ms($env, $default),
            }
        }
    };
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port.is_none() && self.socket.is_none() {
            anyhow::bail!("either --port or --socket must be specified");
        }
        if self.terminal_buffer_size == Some(0) {
            anyhow::bail!("--terminal-buffer-size must be greater than zero");
        }
        if self.cols == 0 || self.rows == 0 {
            anyhow::bail!("--cols and --rows must be greater than zero");
        }
        if self.client_queue == 0 {
            anyhow::bail!("--client-queue must be greater than zero");
        }
        if let Some(ref cmd) = self.host_command {
            if cmd.trim().is_empty() {
                anyhow::bail!("--host-command must not be empty");
            }
        }
        Ok(())
    }

    // -- Tuning knobs (field override → env var → compiled default) --------

    duration_field!(
        host_request_timeout,
        host_request_timeout_ms,
        "BRIDGETERM_HOST_REQUEST_TIMEOUT_MS",
        3_000
    );
    duration_field!(host_kill_grace, host_kill_grace_ms, "BRIDGETERM_HOST_KILL_GRACE_MS", 7_000);
    duration_field!(shutdown_timeout, shutdown_timeout_ms, "BRIDGETERM_SHUTDOWN_TIMEOUT_MS", 10_000);

    /// Size used when a client starts a session without reporting one.
    pub fn default_size(&self) -> TermSize {
        TermSize::new(self.cols, self.rows)
    }

    /// Resolve the effective terminal settings: explicit flags win over the
    /// settings file, which wins over compiled defaults.
    pub fn terminal_settings(&self, file: &TerminalFileConfig) -> TerminalSettings {
        TerminalSettings {
            enabled: self.enable_terminal,
            persistence: self.terminal_persistence.or(file.persistence).unwrap_or(false),
            buffer_size: self
                .terminal_buffer_size
                .or(file.buffer_size.filter(|n| *n > 0))
                .unwrap_or(DEFAULT_BUFFER_SIZE),
            show_warning: self.terminal_show_warning.or(file.show_warning).unwrap_or(false),
            shell: self.shell.clone().unwrap_or_else(|| FALLBACK_SHELL.to_owned()),
            shell_args: self.shell_args.clone(),
            cwd: self.cwd.clone().or_else(|| self.storage_path.clone()),
            env: vec![("BRIDGETERM".to_owned(), "1".to_owned())],
            default_size: self.default_size(),
            client_queue: self.client_queue,
        }
    }

    /// Build a minimal `Config` for tests (port 0, terminal enabled).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            port: Some(0),
            socket: None,
            host: "127.0.0.1".into(),
            config_path: None,
            storage_path: None,
            enable_terminal: true,
            terminal_persistence: None,
            terminal_buffer_size: None,
            terminal_show_warning: None,
            shell: Some(FALLBACK_SHELL.into()),
            shell_args: vec![],
            cwd: None,
            cols: 80,
            rows: 24,
            client_queue: 64,
            host_command: None,
            log_format: "text".into(),
            log_level: "debug".into(),
            host_request_timeout_ms: Some(200),
            host_kill_grace_ms: Some(200),
            shutdown_timeout_ms: Some(100),
        }
    }
}

/// Effective terminal behavior, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSettings {
    /// Terminal access gate. When off, every session request is refused.
    pub enabled: bool,
    /// Share one long-lived shell across clients.
    pub persistence: bool,
    /// Maximum bytes of output kept for replay to late joiners.
    pub buffer_size: usize,
    /// Whether the navigation guard asks before leaving a typed-in terminal.
    pub show_warning: bool,
    pub shell: String,
    pub shell_args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub default_size: TermSize,
    pub client_queue: usize,
}

impl TerminalSettings {
    pub fn spawn_spec(&self, size: TermSize) -> SpawnSpec {
        SpawnSpec {
            shell: self.shell.clone(),
            args: self.shell_args.clone(),
            size,
            cwd: self.cwd.clone(),
            env: self.env.clone(),
        }
    }
}

/// Terminal keys of the UI platform block in the bridge settings file:
///
/// ```json
/// { "platforms": [ { "platform": "config",
///     "terminal": { "persistence": true, "showWarning": true, "bufferSize": 50000 } } ] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalFileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_warning: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    platforms: Vec<serde_json::Value>,
}

/// Load the terminal keys from the bridge settings file at `path`.
///
/// A missing file, a missing UI block, or missing keys all yield defaults.
/// A file that exists but does not parse is an error.
pub fn load_terminal_config(path: &Path) -> anyhow::Result<TerminalFileConfig> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(TerminalFileConfig::default());
        }
        Err(e) => return Err(e.into()),
    };
    let file: SettingsFile = serde_json::from_str(&contents)?;

    let block = file
        .platforms
        .iter()
        .find(|p| p.get("platform").and_then(|v| v.as_str()) == Some("config"));
    let Some(terminal) = block.and_then(|b| b.get("terminal")) else {
        return Ok(TerminalFileConfig::default());
    };
    Ok(serde_json::from_value(terminal.clone())?)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
