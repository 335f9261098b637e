use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use url::Url;

use shoreline::session::RegistryOptions;
use shoreline::transport::{MemoryHost, memory};
use shoreline::{
    ConnectionState, Control, Frame, ReconnectPolicy, RegistryError, Renderer, SessionStatus,
    TransportConnection, TransportHandle, Workspace, WorkspaceEvent,
};

#[derive(Clone, Default)]
struct SharedRenderer(Arc<Mutex<Vec<u8>>>);

impl SharedRenderer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Renderer for SharedRenderer {
    fn write(&mut self, bytes: &[u8]) {
        self.0.lock().unwrap().extend_from_slice(bytes);
    }

    fn reset(&mut self) {
        self.0.lock().unwrap().clear();
    }
}

struct Harness {
    host: MemoryHost,
    transport: TransportHandle,
    controls: mpsc::UnboundedSender<Control>,
    events: broadcast::Receiver<WorkspaceEvent>,
    renderer: SharedRenderer,
    running: JoinHandle<Workspace<SharedRenderer>>,
}

fn start() -> Harness {
    let (connector, host) = memory::pair();
    let endpoint = Url::parse("ws://127.0.0.1:8080/terminal?projectId=demo").unwrap();
    let (transport, transport_events, _task) =
        TransportConnection::spawn(endpoint, Arc::new(connector), ReconnectPolicy::default());
    let renderer = SharedRenderer::default();
    let workspace = Workspace::new(
        transport.clone(),
        RegistryOptions::default(),
        renderer.clone(),
    );
    let events = workspace.subscribe();
    let (controls, control_rx) = mpsc::unbounded_channel();
    let running = tokio::spawn(workspace.run(transport_events, control_rx));
    Harness {
        host,
        transport,
        controls,
        events,
        renderer,
        running,
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<WorkspaceEvent>,
    predicate: impl Fn(&WorkspaceEvent) -> bool,
) -> WorkspaceEvent {
    loop {
        let event = events.recv().await.expect("workspace events ended");
        if predicate(&event) {
            return event;
        }
    }
}

#[test_timeout::tokio_timeout_test(paused)]
async fn input_typed_while_disconnected_is_sent_once_after_reconnect() {
    let mut h = start();
    let peer = h.host.accept().await.unwrap();
    wait_for(&mut h.events, |e| {
        *e == WorkspaceEvent::Connection(ConnectionState::Open)
    })
    .await;

    drop(peer);
    wait_for(&mut h.events, |e| {
        *e == WorkspaceEvent::Connection(ConnectionState::Closed)
    })
    .await;
    assert_eq!(h.transport.state(), ConnectionState::Closed);

    for key in "ls -la\r".bytes() {
        h.controls.send(Control::Keystroke(vec![key])).unwrap();
    }

    let mut peer = h.host.accept().await.unwrap();
    let mut received = String::new();
    while received.len() < "ls -la\r".len() {
        match peer.recv_frame().await {
            Some(Frame::Input {
                session_id,
                payload,
            }) => {
                assert_eq!(session_id, "main");
                received.push_str(&payload);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
    assert_eq!(received, "ls -la\r");
    wait_for(&mut h.events, |e| *e == WorkspaceEvent::Resumed).await;
    assert_eq!(peer.try_recv_frame(), None);

    h.controls.send(Control::Shutdown).unwrap();
    let workspace = h.running.await.unwrap();
    assert_eq!(
        workspace
            .registry()
            .active()
            .history()
            .entries()
            .collect::<Vec<_>>(),
        vec!["ls -la"]
    );
}

#[test_timeout::tokio_timeout_test(paused)]
async fn host_output_is_routed_by_session() {
    let mut h = start();
    let peer = h.host.accept().await.unwrap();

    h.controls
        .send(Control::CreateSession(Some("session-2".into())))
        .unwrap();
    let created = wait_for(&mut h.events, |e| {
        matches!(e, WorkspaceEvent::SessionCreated { .. })
    })
    .await;
    let WorkspaceEvent::SessionCreated { session_id: second, .. } = created else {
        unreachable!()
    };

    peer.send_frame(&Frame::output("main", "main output"));
    peer.send_frame(&Frame::output(second.clone(), "second output"));
    peer.send_frame(&Frame::working_directory(second.clone(), "/work"));
    wait_for(&mut h.events, |e| {
        matches!(e, WorkspaceEvent::WorkingDirectoryChanged { .. })
    })
    .await;
    assert_eq!(h.renderer.contents(), "second output");

    h.controls.send(Control::SetActive("main".into())).unwrap();
    wait_for(&mut h.events, |e| {
        *e == WorkspaceEvent::ActiveChanged {
            session_id: "main".into(),
        }
    })
    .await;
    assert_eq!(h.renderer.contents(), "main output");

    h.controls.send(Control::Shutdown).unwrap();
    let workspace = h.running.await.unwrap();
    assert_eq!(
        workspace.registry().get(&second).unwrap().working_directory(),
        "/work"
    );
    assert_eq!(workspace.registry().get("main").unwrap().working_directory(), "/");
}

#[test_timeout::tokio_timeout_test(paused)]
async fn failed_session_stays_open_and_recovers() {
    let mut h = start();
    let mut peer = h.host.accept().await.unwrap();

    peer.send_frame(&Frame::status("main", SessionStatus::Error));
    peer.send_frame(&Frame::error("main", "shell exited with 127"));
    wait_for(&mut h.events, |e| {
        matches!(
            e,
            WorkspaceEvent::StatusChanged {
                status: SessionStatus::Error,
                ..
            }
        )
    })
    .await;

    h.controls.send(Control::RestartActive).unwrap();
    assert_eq!(peer.recv_frame().await, Some(Frame::restart("main")));

    peer.send_frame(&Frame::status("main", SessionStatus::Running));
    wait_for(&mut h.events, |e| {
        matches!(
            e,
            WorkspaceEvent::StatusChanged {
                status: SessionStatus::Running,
                ..
            }
        )
    })
    .await;
    assert!(h.renderer.contents().contains("\x1b[31mshell exited with 127\x1b[0m"));

    h.controls.send(Control::Shutdown).unwrap();
    let workspace = h.running.await.unwrap();
    assert_eq!(workspace.registry().len(), 1);
    assert_eq!(workspace.registry().active().status(), SessionStatus::Running);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn last_session_cannot_be_closed() {
    let mut h = start();
    let mut peer = h.host.accept().await.unwrap();

    h.controls.send(Control::CloseActive).unwrap();
    let rejected = wait_for(&mut h.events, |e| {
        matches!(e, WorkspaceEvent::CloseRejected { .. })
    })
    .await;
    assert_eq!(
        rejected,
        WorkspaceEvent::CloseRejected {
            session_id: "main".into(),
            reason: RegistryError::LastSession.to_string(),
        }
    );

    h.controls.send(Control::SendCommand("whoami".into())).unwrap();
    assert_eq!(peer.recv_frame().await, Some(Frame::input("main", "whoami\r")));

    h.controls.send(Control::Shutdown).unwrap();
    let workspace = h.running.await.unwrap();
    assert_eq!(workspace.registry().len(), 1);
    assert_eq!(workspace.registry().active_id(), "main");
}

#[test_timeout::tokio_timeout_test(paused)]
async fn closing_a_session_notifies_host_and_drops_its_late_output() {
    let mut h = start();
    let mut peer = h.host.accept().await.unwrap();

    h.controls.send(Control::CreateSession(None)).unwrap();
    let WorkspaceEvent::SessionCreated { session_id, .. } = wait_for(&mut h.events, |e| {
        matches!(e, WorkspaceEvent::SessionCreated { .. })
    })
    .await
    else {
        unreachable!()
    };

    h.controls.send(Control::Close(session_id.clone())).unwrap();
    assert_eq!(
        peer.recv_frame().await,
        Some(Frame::close_session(session_id.clone()))
    );

    peer.send_frame(&Frame::output(session_id.clone(), "too late"));
    peer.send_frame(&Frame::output("main", "still here"));
    while !h.renderer.contents().contains("still here") {
        tokio::task::yield_now().await;
    }
    assert!(!h.renderer.contents().contains("too late"));

    h.controls.send(Control::Shutdown).unwrap();
    let workspace = h.running.await.unwrap();
    assert_eq!(workspace.registry().session_ids(), vec!["main".to_string()]);
}
