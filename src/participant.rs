#![forbid(unsafe_code)]

// Participant driver: connect, wire relay/sessions/emitter together, route inbound frames

use crate::auth::TokenIssuer;
use crate::config::HarnessConfig;
use crate::error::Result;
use crate::media::MediaEmitter;
use crate::metrics::{ParticipantMetrics, ParticipantReport};
use crate::negotiation::{
    PeerFactory, ReceiverSession, ReceiverState, SenderSession, SenderState,
};
use crate::signaling::{self, run_relay, Envelope, SignalingRelay};
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

/// Everything a participant needs from the harness
#[derive(Clone)]
pub struct ParticipantContext {
    pub config: Arc<HarnessConfig>,
    pub issuer: TokenIssuer,
    pub factory: Arc<dyn PeerFactory>,
}

impl ParticipantContext {
    pub fn new(config: HarnessConfig, factory: Arc<dyn PeerFactory>) -> Self {
        let issuer = TokenIssuer::new(config.jwt_secret.clone());
        Self {
            config: Arc::new(config),
            issuer,
            factory,
        }
    }
}

/// Routes each inbound envelope to the session it belongs to
pub struct FrameRouter {
    participant_id: String,
    sender: Arc<SenderSession>,
    receiver: Arc<ReceiverSession>,
    relay: SignalingRelay,
    metrics: Arc<ParticipantMetrics>,
}

impl FrameRouter {
    pub fn new(
        participant_id: &str,
        sender: Arc<SenderSession>,
        receiver: Arc<ReceiverSession>,
        relay: SignalingRelay,
        metrics: Arc<ParticipantMetrics>,
    ) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            sender,
            receiver,
            relay,
            metrics,
        }
    }

    /// Handle one text frame. Failures are logged and recorded; they never end the read loop.
    pub async fn route(&self, text: &str) {
        let envelope = match Envelope::from_frame(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("{}: Dropping malformed frame: {}", self.participant_id, e);
                self.metrics.record_malformed_frame(format!("malformed frame: {}", e));
                return;
            }
        };

        let outcome = match envelope {
            Envelope::Offer { data, .. } => {
                debug!("{}: Received offer", self.participant_id);
                self.receiver.handle_offer(data, &self.relay).await
            }
            Envelope::Answer { data, .. } => {
                debug!("{}: Received answer", self.participant_id);
                self.sender.handle_answer(data).await
            }
            Envelope::Unknown => {
                debug!("{}: Ignoring frame of unknown type", self.participant_id);
                Ok(())
            }
        };

        if let Err(e) = outcome {
            warn!("{}: Signaling operation abandoned: {}", self.participant_id, e);
            self.metrics.record_error(e.to_string());
        }
    }
}

/// Read inbound frames until the transport errors, closes, ends, or shutdown is signalled.
pub async fn run_read_loop<S>(router: FrameRouter, mut frames: S, mut shutdown: watch::Receiver<bool>)
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    let id = router.participant_id.clone();
    loop {
        let next = tokio::select! {
            _ = crate::cancelled(&mut shutdown) => break,
            next = frames.next() => next,
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    router.metrics.record_frame_received();
                    warn!("{}: Dropping non-UTF-8 binary frame", id);
                    router.metrics.record_malformed_frame("non-UTF-8 binary frame".to_string());
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                info!("{}: Signaling server closed the connection: {:?}", id, frame);
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!("{}: Signaling read failed: {}", id, e);
                router.metrics.record_error(format!("signaling read failed: {}", e));
                break;
            }
            None => {
                info!("{}: Signaling stream ended", id);
                break;
            }
        };

        router.metrics.record_frame_received();
        router.route(&text).await;
    }
    debug!("{}: Read loop finished", id);
}

/// A running participant; `stop` cancels and joins everything it spawned
pub struct ParticipantHandle {
    participant_id: String,
    shutdown: watch::Sender<bool>,
    sender: Arc<SenderSession>,
    receiver: Arc<ReceiverSession>,
    emitter: Option<MediaEmitter>,
    relay_task: JoinHandle<()>,
    read_task: JoinHandle<()>,
    metrics: Arc<ParticipantMetrics>,
}

impl ParticipantHandle {
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn metrics(&self) -> &Arc<ParticipantMetrics> {
        &self.metrics
    }

    pub fn sender_state(&self) -> watch::Receiver<SenderState> {
        self.sender.subscribe()
    }

    pub fn receiver_state(&self) -> watch::Receiver<ReceiverState> {
        self.receiver.subscribe()
    }

    /// Cancel every task, wait for them, then close both peers.
    pub async fn stop(self) -> ParticipantReport {
        let id = self.participant_id;
        let _ = self.shutdown.send(true);

        if let Some(emitter) = self.emitter {
            emitter.join().await;
        }
        if let Err(e) = self.read_task.await {
            error!("{}: Read loop panicked: {}", id, e);
        }
        if let Err(e) = self.relay_task.await {
            error!("{}: Relay consumer panicked: {}", id, e);
        }

        if let Err(e) = self.sender.close().await {
            debug!("{}: Sender close error (non-fatal): {}", id, e);
        }
        if let Err(e) = self.receiver.close().await {
            debug!("{}: Receiver close error (non-fatal): {}", id, e);
        }

        info!("{}: Participant stopped", id);
        self.metrics.generate_report()
    }
}

/// Bring one participant online.
///
/// Only a failure to obtain a token, open the signaling socket or build the peers is returned;
/// everything after that is recorded in `metrics` and the participant keeps running.
pub async fn start_participant(
    ctx: &ParticipantContext,
    participant_id: &str,
    metrics: Arc<ParticipantMetrics>,
) -> Result<ParticipantHandle> {
    let config = &ctx.config;
    let token = ctx.issuer.issue(&config.meeting_id, participant_id)?;
    let url = config.signaling_url(&token)?;

    let stream = signaling::open(&url).await?;
    metrics.mark_connection_successful();
    info!(
        "{}: Connected to signaling server {} (meeting {})",
        participant_id, config.server_addr, config.meeting_id
    );

    let sender_peer = ctx.factory.sender_peer(participant_id).await?;
    let receiver_engine = ctx
        .factory
        .receiver_peer(participant_id, Arc::clone(&metrics))
        .await?;
    let sender = Arc::new(SenderSession::new(
        participant_id,
        sender_peer.engine,
        Arc::clone(&metrics),
    ));
    let receiver = Arc::new(ReceiverSession::new(
        participant_id,
        receiver_engine,
        Arc::clone(&metrics),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (write, read) = stream.split();

    let (relay, queue) = SignalingRelay::channel(config.relay_capacity);
    let relay_task = tokio::spawn(run_relay(
        participant_id.to_string(),
        queue,
        write,
        Arc::clone(&metrics),
        shutdown_rx.clone(),
    ));

    let emitter = match sender.create_offer().await {
        Ok(()) => Some(MediaEmitter::start(
            participant_id,
            &config.media,
            &sender_peer.tracks,
            Arc::clone(&metrics),
            shutdown_rx.clone(),
        )),
        Err(e) => {
            error!("{}: Failed to create offer: {}", participant_id, e);
            metrics.record_error(format!("create offer: {}", e));
            None
        }
    };

    if emitter.is_some() {
        if let Err(e) = sender.send_offer(&relay).await {
            error!("{}: Failed to send offer: {}", participant_id, e);
            metrics.record_error(format!("send offer: {}", e));
        }
    }

    let router = FrameRouter::new(
        participant_id,
        Arc::clone(&sender),
        Arc::clone(&receiver),
        relay,
        Arc::clone(&metrics),
    );
    let read_task = tokio::spawn(run_read_loop(router, read, shutdown_rx));

    Ok(ParticipantHandle {
        participant_id: participant_id.to_string(),
        shutdown: shutdown_tx,
        sender,
        receiver,
        emitter,
        relay_task,
        read_task,
        metrics,
    })
}
