use std::io::{IsTerminal, Read};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::protocol::SessionStatus;
use crate::telemetry::logging;
use crate::terminal::cli::Cli;
use crate::terminal::error::CliError;
use crate::terminal::keys::{HELP, PrefixDecoder};
use crate::terminal::render::StdoutRenderer;
use crate::terminal::tty::RawModeGuard;
use crate::transport::{ConnectionState, TransportConnection, WebSocketConnector};
use crate::workspace::{Control, Workspace, WorkspaceEvent};

pub async fn run(cli: Cli) -> Result<(), CliError> {
    logging::init(&cli.logging.to_config())?;
    let config = cli.client_config()?;
    let endpoint = config.endpoint();
    info!(
        target: "shoreline::app",
        endpoint = %endpoint,
        project = config.project(),
        "attaching to workspace"
    );

    let (transport, transport_events, transport_task) = TransportConnection::spawn(
        endpoint,
        Arc::new(WebSocketConnector),
        config.reconnect(),
    );
    let workspace = Workspace::new(
        transport,
        config.registry_options().clone(),
        StdoutRenderer::new(),
    );
    let notices = spawn_notices(workspace.subscribe());

    let interactive = std::io::stdin().is_terminal();
    let raw_mode = RawModeGuard::new(interactive);
    if interactive {
        notice(&format!("connecting to {} ({HELP})", config.host()));
    }

    let (controls_tx, controls_rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(controls_tx)?;

    let workspace = workspace.run(transport_events, controls_rx).await;
    if let Err(err) = transport_task.await {
        return Err(CliError::Runtime(format!("transport task failed: {err}")));
    }
    notices.abort();
    drop(raw_mode);

    let sessions = workspace.registry().len();
    eprintln!("detached ({sessions} session(s) left running on the host)");
    Ok(())
}

/// Blocking stdin reads live on their own thread; the runtime only sees the
/// decoded controls.
fn spawn_stdin_reader(controls: mpsc::UnboundedSender<Control>) -> Result<(), CliError> {
    std::thread::Builder::new()
        .name("shoreline-stdin".into())
        .spawn(move || {
            let mut stdin = std::io::stdin();
            let mut decoder = PrefixDecoder::new();
            let mut buf = [0u8; 1024];
            loop {
                let read = match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        debug!(target: "shoreline::app", error = %err, "stdin read failed");
                        break;
                    }
                };
                for control in decoder.feed(&buf[..read]) {
                    if controls.send(control).is_err() {
                        return;
                    }
                }
            }
            let _ = controls.send(Control::Shutdown);
        })?;
    Ok(())
}

fn spawn_notices(mut events: broadcast::Receiver<WorkspaceEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = describe(&event) {
                        notice(&line);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(target: "shoreline::app", skipped, "notice stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Raw mode turns off output post-processing, hence the explicit `\r`.
fn notice(line: &str) {
    eprint!("\r\n[shoreline] {line}\r\n");
}

fn describe(event: &WorkspaceEvent) -> Option<String> {
    let line = match event {
        WorkspaceEvent::SessionCreated { session_id, name } if session_id == name => {
            format!("opened {session_id}")
        }
        WorkspaceEvent::SessionCreated { session_id, name } => {
            format!("opened {name} ({session_id})")
        }
        WorkspaceEvent::SessionClosed { session_id } => format!("closed {session_id}"),
        WorkspaceEvent::ActiveChanged { session_id } => format!("now on {session_id}"),
        WorkspaceEvent::StatusChanged { session_id, status } => match status {
            SessionStatus::Running => format!("{session_id} is running"),
            SessionStatus::Stopped => format!("{session_id} stopped (C-a r to restart)"),
            SessionStatus::Error => format!("{session_id} failed (C-a r to restart)"),
        },
        WorkspaceEvent::Connection(ConnectionState::Open) => "connected".to_string(),
        WorkspaceEvent::Connection(ConnectionState::Closed) => {
            "disconnected; input is queued until the connection returns".to_string()
        }
        WorkspaceEvent::Resumed => "reconnected".to_string(),
        WorkspaceEvent::CloseRejected { reason, .. } => reason.clone(),
        WorkspaceEvent::Connection(ConnectionState::Connecting)
        | WorkspaceEvent::StatusConfirmed { .. }
        | WorkspaceEvent::WorkingDirectoryChanged { .. } => return None,
    };
    Some(line)
}
