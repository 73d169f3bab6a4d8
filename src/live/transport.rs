//! WebSocket transport for the realtime session
//!
//! `connect` dials the backend, puts the setup frame on the wire first,
//! then hands back a cloneable write handle and an event receiver. A
//! writer task drains queued client messages; a reader task decodes
//! inbound frames. Once the session is torn down the writer's channel is
//! gone, so late sends are dropped rather than queued.

use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite};

use crate::live::protocol::{ClientMessage, ServerMessage, Setup};
use crate::{Error, Result};

/// Default realtime API host
pub const DEFAULT_LIVE_HOST: &str = "generativelanguage.googleapis.com";

const BIDI_PATH: &str =
    "/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Where and how to dial the realtime API.
#[derive(Debug, Clone)]
pub struct LiveEndpoint {
    pub host: String,
    pub api_key: SecretString,
}

impl LiveEndpoint {
    /// Build the dial URL. The key rides in the query string, so the URL
    /// must never be logged.
    fn url(&self) -> Result<url::Url> {
        let raw = format!(
            "wss://{}{BIDI_PATH}?key={}",
            self.host,
            self.api_key.expose_secret()
        );
        url::Url::parse(&raw).map_err(|e| Error::Transport(format!("invalid endpoint: {e}")))
    }
}

/// Events surfaced by the reader task.
#[derive(Debug)]
pub enum TransportEvent {
    /// One decoded inbound frame
    Message(Box<ServerMessage>),
    /// The connection ended; emitted exactly once
    Closed { reason: String },
}

/// Cloneable write half. Sends against a torn-down session are dropped.
#[derive(Debug, Clone)]
pub struct OutboundSink {
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl OutboundSink {
    /// A sink plus the receiver its messages drain into. `connect` wires
    /// the receiver to the socket; tests keep it to inspect traffic.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message for the writer task. A closed session drops it.
    pub fn send(&self, message: ClientMessage) {
        if self.tx.send(message).is_err() {
            tracing::debug!("dropping outbound message for closed session");
        }
    }
}

/// Dial the realtime endpoint and send `setup` as the first frame.
///
/// # Errors
///
/// Returns [`Error::Transport`] when the dial or the setup send fails.
pub async fn connect(
    endpoint: &LiveEndpoint,
    setup: Setup,
) -> Result<(OutboundSink, mpsc::UnboundedReceiver<TransportEvent>)> {
    let url = endpoint.url()?;
    let (stream, _response) = connect_async(url.as_str())
        .await
        .map_err(|e| Error::Transport(format!("connect failed: {e}")))?;
    tracing::debug!(host = %endpoint.host, "realtime socket open");

    let (mut ws_tx, mut ws_rx) = stream.split();

    let first = serde_json::to_string(&ClientMessage::Setup { setup })?;
    ws_tx
        .send(tungstenite::Message::Text(first.into()))
        .await
        .map_err(|e| Error::Transport(format!("setup send failed: {e}")))?;

    let (sink, mut out_rx) = OutboundSink::channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    // Writer: drains queued messages until every sink clone is gone
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(text) => {
                    if let Err(e) = ws_tx.send(tungstenite::Message::Text(text.into())).await {
                        tracing::debug!(error = %e, "websocket send failed");
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "unserializable client message"),
            }
        }
        // Tolerates an already-closed socket
        let _ = ws_tx.close().await;
    });

    // Reader: decode frames until the peer closes or errors
    tokio::spawn(async move {
        let mut reason = "connection closed".to_string();
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(tungstenite::Message::Text(text)) => forward(&event_tx, text.as_bytes()),
                Ok(tungstenite::Message::Binary(data)) => forward(&event_tx, &data),
                Ok(tungstenite::Message::Close(close_frame)) => {
                    if let Some(cf) = close_frame {
                        reason = format!("closed by peer: {} {}", cf.code, cf.reason);
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    reason = e.to_string();
                    break;
                }
            }
        }
        let _ = event_tx.send(TransportEvent::Closed { reason });
    });

    Ok((sink, event_rx))
}

fn forward(event_tx: &mpsc::UnboundedSender<TransportEvent>, raw: &[u8]) {
    match ServerMessage::parse(raw) {
        Ok(message) => {
            let _ = event_tx.send(TransportEvent::Message(Box::new(message)));
        }
        Err(e) => tracing::debug!(error = %e, "skipping unrecognized frame"),
    }
}
