//! In-process connector. Each successful `connect` hands the host side a
//! [`MemoryPeer`]; dropping the peer closes that link, which drives the
//! reconnect path without a network.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use url::Url;

use super::{Connector, Link, TransportError};
use crate::protocol::{Frame, FrameCodec, WireMessage};

#[derive(Default)]
struct Shared {
    refusing: AtomicBool,
    attempts: AtomicUsize,
}

pub fn pair() -> (MemoryConnector, MemoryHost) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());
    (
        MemoryConnector {
            accept: accept_tx,
            shared: Arc::clone(&shared),
        },
        MemoryHost {
            accept: accept_rx,
            shared,
        },
    )
}

pub struct MemoryConnector {
    accept: mpsc::UnboundedSender<MemoryPeer>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn Link>, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".into(),
            });
        }

        let (to_host, from_client) = mpsc::unbounded_channel();
        let (to_client, from_host) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            endpoint: endpoint.clone(),
            outbound: to_client,
            inbound: from_client,
        };
        self.accept
            .send(peer)
            .map_err(|_| TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "host is gone".into(),
            })?;
        Ok(Box::new(MemoryLink {
            outbound: Some(to_host),
            inbound: from_host,
        }))
    }
}

pub struct MemoryHost {
    accept: mpsc::UnboundedReceiver<MemoryPeer>,
    shared: Arc<Shared>,
}

impl MemoryHost {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept.recv().await
    }

    /// While set, every connect attempt fails.
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.store(refusing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// The host end of one link.
pub struct MemoryPeer {
    endpoint: Url,
    outbound: mpsc::UnboundedSender<WireMessage>,
    inbound: mpsc::UnboundedReceiver<WireMessage>,
}

impl MemoryPeer {
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn send_frame(&self, frame: &Frame) -> bool {
        match FrameCodec::new().encode(frame) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.outbound.send(WireMessage::Text(text.into())).is_ok()
    }

    pub fn send_raw(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.outbound.send(WireMessage::Binary(bytes.into())).is_ok()
    }

    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.inbound.recv().await
    }

    /// Next message from the client that decodes as a frame.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        let codec = FrameCodec::new();
        while let Some(message) = self.inbound.recv().await {
            if let Ok(frame) = codec.decode(message.as_bytes()) {
                return Some(frame);
            }
        }
        None
    }

    pub fn try_recv_frame(&mut self) -> Option<Frame> {
        let message = self.inbound.try_recv().ok()?;
        FrameCodec::new().decode(message.as_bytes()).ok()
    }
}

struct MemoryLink {
    outbound: Option<mpsc::UnboundedSender<WireMessage>>,
    inbound: mpsc::UnboundedReceiver<WireMessage>,
}

#[async_trait]
impl Link for MemoryLink {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound.send(message).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.outbound = None;
        self.inbound.close();
    }
}
