use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

use super::{Connector, Link, TransportError};
use crate::protocol::WireMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn Link>, TransportError> {
        match endpoint.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::InvalidEndpoint(format!(
                    "unsupported scheme `{other}` in {endpoint}"
                )));
            }
        }
        let (stream, response) =
            connect_async(endpoint.as_str())
                .await
                .map_err(|err| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: err.to_string(),
                })?;
        debug!(
            target: "shoreline::transport::websocket",
            endpoint = %endpoint,
            status = %response.status(),
            "websocket handshake complete"
        );
        Ok(Box::new(WebSocketLink { stream }))
    }
}

struct WebSocketLink {
    stream: WsStream,
}

#[async_trait]
impl Link for WebSocketLink {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        let message = match message {
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Binary(bytes) => Message::Binary(bytes),
        };
        self.stream.send(message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(WireMessage::Text(text))),
                Ok(Message::Binary(bytes)) => return Some(Ok(WireMessage::Binary(bytes))),
                // tungstenite queues the pong itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    trace!(
                        target: "shoreline::transport::websocket",
                        close = ?frame,
                        "close frame received"
                    );
                    return None;
                }
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(
                target: "shoreline::transport::websocket",
                error = %err,
                "error while closing websocket"
            );
        }
    }
}
