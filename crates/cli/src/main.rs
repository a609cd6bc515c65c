// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bridgeterm::config::{load_terminal_config, Config, TerminalFileConfig};
use bridgeterm::host::HostProcess;
use bridgeterm::pty::spawn::NativeSpawner;
use bridgeterm::session::SessionManager;
use bridgeterm::transport::{build_router, AppState};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    if let Err(e) = run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).init();
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let file = match config.config_path {
        Some(ref path) => load_terminal_config(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e:#}", path.display()))?,
        None => TerminalFileConfig::default(),
    };
    let settings = config.terminal_settings(&file);
    info!(
        enabled = settings.enabled,
        persistence = settings.persistence,
        buffer_size = settings.buffer_size,
        shell = %settings.shell,
        "terminal settings resolved"
    );

    let manager = Arc::new(SessionManager::new(settings, Arc::new(NativeSpawner)));

    let host = match config.host_command {
        Some(ref command) => Some(HostProcess::spawn(
            command,
            config.host_request_timeout(),
            config.host_kill_grace(),
        )?),
        None => None,
    };

    let app_state = Arc::new(AppState::new(Arc::clone(&manager), host.clone()));
    let shutdown = app_state.shutdown.clone();
    let mut servers: Vec<JoinHandle<()>> = Vec::new();

    // Spawn HTTP server
    if let Some(port) = config.port {
        let router = build_router(Arc::clone(&app_state));
        let addr = format!("{}:{}", config.host, port);
        let listener = TcpListener::bind(&addr).await?;
        info!("HTTP listening on {addr}");
        let sd = shutdown.clone();
        servers.push(tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(sd.cancelled_owned())
                .await;
            if let Err(e) = result {
                error!("HTTP server error: {e}");
            }
        }));
    }

    // Spawn Unix socket server
    if let Some(ref socket_path) = config.socket {
        let router = build_router(Arc::clone(&app_state));
        let path = socket_path.clone();
        // Remove stale socket
        let _ = std::fs::remove_file(&path);
        let uds_listener = tokio::net::UnixListener::bind(&path)?;
        info!("Unix socket listening on {path}");
        let sd = shutdown.clone();
        servers.push(tokio::spawn(async move {
            let mut make_svc = router.into_make_service();
            loop {
                tokio::select! {
                    _ = sd.cancelled() => break,
                    accept = uds_listener.accept() => {
                        match accept {
                            Ok((stream, _)) => {
                                // IntoMakeService implements Service<T> for any T
                                let svc_future = <_ as tower::Service<_>>::call(&mut make_svc, ());
                                tokio::spawn(async move {
                                    let Ok(svc) = svc_future.await;
                                    let io = hyper_util::rt::TokioIo::new(stream);
                                    let hyper_svc = hyper_util::service::TowerToHyperService::new(svc);
                                    let _ = hyper_util::server::conn::auto::Builder::new(
                                        hyper_util::rt::TokioExecutor::new(),
                                    )
                                    .serve_connection_with_upgrades(io, hyper_svc)
                                    .await;
                                });
                            }
                            Err(e) => {
                                tracing::debug!("unix socket accept error: {e}");
                            }
                        }
                    }
                }
            }
            let _ = std::fs::remove_file(&path);
        }));
    }

    spawn_signal_handler(shutdown.clone());

    // Wait for a signal, or for the host to exit on its own.
    match host {
        Some(ref host) => {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = host.exited() => {
                    warn!(status = ?host.status(), "host process exited, shutting down");
                    shutdown.cancel();
                }
            }
        }
        None => shutdown.cancelled().await,
    }

    info!("shutting down");
    manager.shutdown();

    let timeout = config.shutdown_timeout();
    let drain = async {
        if let Some(ref host) = host {
            if host.shutdown().await {
                warn!("host process needed SIGKILL");
            }
        }
        for server in servers {
            let _ = server.await;
        }
    };
    if tokio::time::timeout(timeout, drain).await.is_err() {
        warn!(?timeout, "shutdown did not finish in time");
    }
    Ok(())
}

fn spawn_signal_handler(sd: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
                sd.cancel();
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
                sd.cancel();
            }
        }
    });
}
