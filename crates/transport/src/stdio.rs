//! Line-delimited JSON transport over stdin/stdout
//!
//! One backend event per stdin line; outbound payloads are written one per
//! stdout line. Malformed lines are logged and skipped - the stream is
//! untrusted and a bad frame must not take the console down.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{decode_frame, TransportError, TransportEvent, TransportHandle};

/// Spawn reader/writer tasks over this process's stdin/stdout.
///
/// Emits `Connected` once at startup and `Disconnected` when stdin reaches
/// EOF. Returns the console-facing halves.
pub fn spawn(buffer: usize) -> (TransportHandle, mpsc::Receiver<TransportEvent>) {
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(buffer);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(buffer);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        if event_tx.send(TransportEvent::Connected).await.is_err() {
            return;
        }

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match decode_frame(line) {
                        Ok(event) => {
                            if event_tx.send(TransportEvent::Event(event)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(
                                component = "transport",
                                event = "transport.frame.malformed",
                                error = %e,
                                "Skipping malformed inbound frame"
                            );
                        }
                    }
                }
                Ok(None) => {
                    info!(
                        component = "transport",
                        event = "transport.stdin.eof",
                        "stdin closed, transport disconnected"
                    );
                    let _ = event_tx
                        .send(TransportEvent::Disconnected {
                            reason: "stdin closed".to_string(),
                        })
                        .await;
                    return;
                }
                Err(e) => {
                    let err = TransportError::Io(e);
                    warn!(
                        component = "transport",
                        event = "transport.stdin.error",
                        error = %err,
                        "stdin read failed, transport disconnected"
                    );
                    let _ = event_tx
                        .send(TransportEvent::Disconnected {
                            reason: err.to_string(),
                        })
                        .await;
                    return;
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(payload) = outbound_rx.recv().await {
            debug!(
                component = "transport",
                event = "transport.send",
                bytes = payload.len(),
            );
            if stdout.write_all(payload.as_bytes()).await.is_err() {
                return;
            }
            if stdout.write_all(b"\n").await.is_err() {
                return;
            }
            let _ = stdout.flush().await;
        }
    });

    (TransportHandle::new(outbound_tx), event_rx)
}
