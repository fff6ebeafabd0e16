//! In-process channel transport
//!
//! Backs the console with plain mpsc channels. The far side of the pair
//! stands in for the backend: tests (and embedding hosts) inject events and
//! observe outbound payloads without any I/O.

use tokio::sync::mpsc;

use crate::{TransportEvent, TransportHandle};

/// The backend-facing side of a channel transport pair
pub struct ChannelPeer {
    event_tx: mpsc::Sender<TransportEvent>,
    outbound_rx: mpsc::Receiver<String>,
}

impl ChannelPeer {
    /// Deliver an event to the console, as the backend would.
    pub async fn deliver(&self, event: TransportEvent) {
        let _ = self.event_tx.send(event).await;
    }

    /// Take the next payload the console sent, if any arrived yet.
    pub fn try_take_sent(&mut self) -> Option<String> {
        self.outbound_rx.try_recv().ok()
    }

    /// Await the next payload the console sent.
    pub async fn take_sent(&mut self) -> Option<String> {
        self.outbound_rx.recv().await
    }
}

/// Create a connected transport pair.
///
/// Returns the console-facing halves (outbound handle + inbound event
/// receiver) and the backend-facing peer.
pub fn pair(buffer: usize) -> (TransportHandle, mpsc::Receiver<TransportEvent>, ChannelPeer) {
    let (event_tx, event_rx) = mpsc::channel(buffer);
    let (outbound_tx, outbound_rx) = mpsc::channel(buffer);

    (
        TransportHandle::new(outbound_tx),
        event_rx,
        ChannelPeer {
            event_tx,
            outbound_rx,
        },
    )
}
