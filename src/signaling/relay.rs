#![forbid(unsafe_code)]

// Bounded, ordered outbound signaling queue: the single writer of a participant's socket

use super::protocol::Envelope;
use crate::error::{HarnessError, Result};
use crate::metrics::ParticipantMetrics;
use futures_util::{Sink, SinkExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error};

/// How long a closing handshake may take before the socket is abandoned
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Producer side of the relay. Cheap to clone; every clone feeds the same ordered queue.
#[derive(Clone)]
pub struct SignalingRelay {
    tx: mpsc::Sender<Envelope>,
}

impl SignalingRelay {
    /// Create the relay and the queue its consumer drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue an envelope, waiting while the queue is full.
    ///
    /// Fails with `RelayClosed` once the consumer has terminated.
    pub async fn enqueue(&self, envelope: Envelope) -> Result<()> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| HarnessError::RelayClosed)
    }
}

/// Drain the queue into `sink`, one text frame per envelope, in enqueue order.
///
/// Returns when the queue closes, on shutdown, or after the first failed write.
pub async fn run_relay<S>(
    participant_id: String,
    mut rx: mpsc::Receiver<Envelope>,
    mut sink: S,
    metrics: Arc<ParticipantMetrics>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let envelope = tokio::select! {
            _ = crate::cancelled(&mut shutdown) => break,
            next = rx.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let frame = match envelope.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("{}: Failed to encode {} envelope: {}", participant_id, envelope.kind(), e);
                metrics.record_error(e.to_string());
                continue;
            }
        };

        let sent = tokio::select! {
            _ = crate::cancelled(&mut shutdown) => {
                debug!("{}: Shutdown while a signaling write was pending", participant_id);
                return;
            }
            sent = sink.send(Message::Text(frame)) => sent,
        };
        if let Err(e) = sent {
            error!("{}: Signaling write failed: {}", participant_id, e);
            metrics.record_error(format!("signaling write failed: {}", e));
            return;
        }
        metrics.record_envelope_sent();
        debug!("{}: Sent {} envelope", participant_id, envelope.kind());
    }

    // Best effort: the peer may already be gone or have stopped reading
    let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
    debug!("{}: Relay consumer finished", participant_id);
}
