//! WebSocket duplex link to the broker (tokio-tungstenite).

use std::time::Duration;

use chatrelay_core::transport::{Connector, DuplexLink};
use chatrelay_types::error::TransportError;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens WebSocket connections to a fixed URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Bound on TCP connect plus the WebSocket handshake.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Link = WsLink;

    async fn connect(&self) -> Result<WsLink, TransportError> {
        let handshake = tokio_tungstenite::connect_async(self.url.as_str());
        let (stream, response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| {
                TransportError::Connect(format!(
                    "timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(url = %self.url, status = %response.status(), "websocket handshake complete");
        Ok(WsLink { stream })
    }
}

pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl DuplexLink for WsLink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(err) => {
                        warn!(len = bytes.len(), error = %err, "dropping non-utf8 binary frame");
                        continue;
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket closed by peer");
                    return None;
                }
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => continue,
                Err(err) => return Some(Err(TransportError::Receive(err.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "websocket close handshake failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::{Message as ServerMessage, WebSocket, WebSocketUpgrade};
    use axum::response::Response;
    use axum::routing::get;
    use axum::Router;

    async fn echo(ws: WebSocketUpgrade) -> Response {
        ws.on_upgrade(|mut socket: WebSocket| async move {
            while let Some(Ok(msg)) = socket.recv().await {
                if let ServerMessage::Text(text) = msg {
                    let reply = format!("{{\"message\":\"echo {}\"}}", text.as_str());
                    if socket.send(ServerMessage::Text(reply.into())).await.is_err() {
                        break;
                    }
                }
            }
        })
    }

    async fn serve() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/", get(echo)))
                .await
                .unwrap();
        });
        format!("ws://{addr}/")
    }

    #[tokio::test]
    async fn test_send_and_receive_text() {
        let url = serve().await;
        let mut link = WsConnector::new(url).connect().await.unwrap();

        link.send("ping".to_string()).await.unwrap();
        let reply = link.recv().await.unwrap().unwrap();
        assert_eq!(reply, r#"{"message":"echo ping"}"#);

        link.close().await;
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WsConnector::new(format!("ws://{addr}/")).connect().await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn test_undecodable_binary_frame_is_skipped() {
        async fn garbage_then_text(ws: WebSocketUpgrade) -> Response {
            ws.on_upgrade(|mut socket: WebSocket| async move {
                let _ = socket.send(ServerMessage::Binary(vec![0xff, 0xfe].into())).await;
                let _ = socket
                    .send(ServerMessage::Text(r#"{"message":"still here"}"#.into()))
                    .await;
                while let Some(Ok(_)) = socket.recv().await {}
            })
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/", get(garbage_then_text)))
                .await
                .unwrap();
        });

        let mut link = WsConnector::new(format!("ws://{addr}/")).connect().await.unwrap();
        let frame = link.recv().await.unwrap().unwrap();
        assert_eq!(frame, r#"{"message":"still here"}"#);
    }

    #[tokio::test]
    async fn test_connect_times_out_on_silent_peer() {
        // Accepts TCP but never answers the handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let result = WsConnector::new(format!("ws://{addr}/"))
            .with_connect_timeout(Duration::from_millis(200))
            .connect()
            .await;
        match result {
            Err(TransportError::Connect(msg)) => assert!(msg.contains("timed out")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("handshake should not complete"),
        }
    }
}
