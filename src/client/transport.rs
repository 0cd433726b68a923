//! Transport abstraction
//!
//! The session engine drives a pair of channels rather than a socket, so
//! any framed duplex transport can sit underneath it — the production
//! WebSocket implementation, or an in-memory pair in tests.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, frame::CloseFrame, Message},
};
use tracing::{debug, trace, warn};

use crate::error::Result;

/// Close code reported when the peer vanished without a close frame
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Outbound instruction to the transport
#[derive(Debug, Clone)]
pub enum TransportCommand {
    /// Send one text message
    Text(String),
    /// Close the connection with a code and reason
    Close { code: u16, reason: String },
}

/// Inbound notification from the transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One text message arrived
    Text(String),
    /// The connection closed; terminal for this link
    Closed { code: u16, reason: String },
}

/// One live connection: commands out, events in.
///
/// Dropping the link tears the connection down.
pub struct TransportLink {
    /// Outbound command channel
    pub tx: mpsc::Sender<TransportCommand>,
    /// Inbound event channel
    pub rx: mpsc::Receiver<TransportEvent>,
}

/// A connectable framed duplex transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open one connection attempt
    async fn connect(&self) -> Result<TransportLink>;
}

/// WebSocket transport backed by tokio-tungstenite
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    /// Create a transport for the given `ws://` or `wss://` URL
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url)?;
        Ok(WsTransport { url })
    }

    /// The URL this transport dials
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<TransportLink> {
        let (ws, _) = connect_async(&self.url).await?;
        debug!("WebSocket connected to {}", self.url);

        let (mut sink, mut stream) = ws.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<TransportCommand>(64);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(256);

        // Outbound pump: commands -> sink. Ends when the engine drops its
        // sender or asks for a close.
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    TransportCommand::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!("WebSocket send failed: {}", e);
                            break;
                        }
                    }
                    TransportCommand::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                            debug!("WebSocket close failed: {}", e);
                        }
                        break;
                    }
                }
            }
        });

        // Inbound pump: stream -> events. Always terminates with exactly
        // one Closed event.
        tokio::spawn(async move {
            let closed = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx.send(TransportEvent::Text(text.to_string())).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(f) => TransportEvent::Closed {
                                code: u16::from(f.code),
                                reason: f.reason.to_string(),
                            },
                            None => TransportEvent::Closed {
                                code: ABNORMAL_CLOSE_CODE,
                                reason: String::new(),
                            },
                        };
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        trace!("ignoring binary WebSocket message");
                    }
                    Some(Err(e)) => {
                        break TransportEvent::Closed {
                            code: ABNORMAL_CLOSE_CODE,
                            reason: e.to_string(),
                        };
                    }
                    None => {
                        break TransportEvent::Closed {
                            code: ABNORMAL_CLOSE_CODE,
                            reason: "connection reset".to_string(),
                        };
                    }
                }
            };
            let _ = event_tx.send(closed).await;
        });

        Ok(TransportLink { tx: cmd_tx, rx: event_rx })
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").field("url", &self.url).finish()
    }
}
