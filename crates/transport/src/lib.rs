//! CrewDeck Transport
//!
//! The boundary to the backend connection. Connection management itself
//! (reconnect, backoff, authentication) lives outside the console core;
//! this crate defines what crosses the boundary: decoded backend events and
//! connection-state changes flowing in, free-text payloads flowing out.

pub mod channel;
pub mod stdio;

use crewdeck_protocol::BackendEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

/// Errors that can occur at the transport boundary
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode one JSON frame into a backend event.
pub fn decode_frame(raw: &str) -> Result<BackendEvent, TransportError> {
    Ok(serde_json::from_str(raw)?)
}

/// What the console receives from the transport, in delivery order
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection is up; sends will be attempted
    Connected,

    /// The connection dropped; sends are skipped until reconnect
    Disconnected { reason: String },

    /// One decoded backend event
    Event(BackendEvent),
}

/// Outbound half of a transport (cheap to clone).
///
/// Sends are fire-and-forget from the console's point of view: a closed
/// transport logs and drops the payload rather than failing the caller.
#[derive(Clone)]
pub struct TransportHandle {
    outbound_tx: mpsc::Sender<String>,
}

impl TransportHandle {
    pub fn new(outbound_tx: mpsc::Sender<String>) -> Self {
        Self { outbound_tx }
    }

    /// Send a free-text payload to the backend.
    pub async fn send_text(&self, text: String) {
        if self.outbound_tx.send(text).await.is_err() {
            warn!(
                component = "transport",
                event = "transport.send.dropped",
                "Transport closed, outbound payload dropped"
            );
        }
    }
}
