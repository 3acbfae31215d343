#![forbid(unsafe_code)]

// Receiver session: answers each accepted inbound offer exactly once

use super::{LinkState, NegotiationEngine, SessionState, StateCell};
use crate::error::Result;
use crate::metrics::ParticipantMetrics;
use crate::signaling::{Envelope, SignalingRelay};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    OfferReceived,
    AnswerCreated,
    AnswerSent,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

/// States in which a fresh offer is accepted: before the first one, or once the previous answer is out
const ACCEPTS_OFFER: [ReceiverState; 4] = [
    ReceiverState::Idle,
    ReceiverState::AnswerSent,
    ReceiverState::Negotiating,
    ReceiverState::Connected,
];

impl SessionState for ReceiverState {
    const ROLE: &'static str = "receiver";

    fn after_link(self, link: LinkState) -> Option<Self> {
        match (self, link) {
            (ReceiverState::Closed, _) => None,
            (_, LinkState::Closed) => Some(ReceiverState::Closed),
            (ReceiverState::Failed, _) => None,
            (_, LinkState::Failed | LinkState::Disconnected) => Some(ReceiverState::Failed),
            (ReceiverState::Negotiating, LinkState::Connected) => Some(ReceiverState::Connected),
            _ => None,
        }
    }

    fn record(self, metrics: &ParticipantMetrics) {
        metrics.set_receiver_state(&format!("{:?}", self));
    }
}

pub struct ReceiverSession {
    participant_id: String,
    engine: Arc<dyn NegotiationEngine>,
    state: Arc<StateCell<ReceiverState>>,
    metrics: Arc<ParticipantMetrics>,
    /// SDP of the last applied offer; the lock also serializes offer handling
    last_offer: Mutex<Option<String>>,
}

impl ReceiverSession {
    pub fn new(
        participant_id: &str,
        engine: Arc<dyn NegotiationEngine>,
        metrics: Arc<ParticipantMetrics>,
    ) -> Self {
        let state = StateCell::new(participant_id, ReceiverState::Idle, Arc::clone(&metrics));
        let observer = Arc::clone(&state);
        engine.on_link_state(Box::new(move |link| observer.apply_link(link)));

        Self {
            participant_id: participant_id.to_string(),
            engine,
            state,
            metrics,
            last_offer: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReceiverState> {
        self.state.subscribe()
    }

    /// Apply a remote offer, answer it and enqueue the answer.
    ///
    /// OfferReceived -> AnswerCreated -> AnswerSent -> Negotiating. An offer identical to the
    /// last answered one is rejected. If any step fails the session returns to the state it
    /// was in before this offer.
    pub async fn handle_offer(&self, offer: RTCSessionDescription, relay: &SignalingRelay) -> Result<()> {
        let mut last_offer = self.last_offer.lock().await;
        self.metrics.record_offer_received();

        if last_offer.as_deref() == Some(offer.sdp.as_str()) {
            return Err(self.state.rejected("accept repeated offer", self.state.current()));
        }

        let previous = self
            .state
            .transition(&ACCEPTS_OFFER, ReceiverState::OfferReceived)
            .map_err(|s| self.state.rejected("accept offer", s))?;

        let participant_id = self.participant_id.clone();
        self.engine.on_remote_track(Box::new(move |track| {
            info!(
                "{}: Remote track: kind={}, codec={}, ssrc={}",
                participant_id, track.kind, track.codec, track.ssrc
            );
        }));

        let sdp = offer.sdp.clone();
        match self.answer(offer, relay).await {
            Ok(()) => {
                *last_offer = Some(sdp);
                info!("{}: Answer sent, receiver negotiating", self.participant_id);
                Ok(())
            }
            Err(e) => {
                // Abandon only this offer; the next one starts from where this one did
                let _ = self.state.transition(
                    &[ReceiverState::OfferReceived, ReceiverState::AnswerCreated],
                    previous,
                );
                *last_offer = None;
                Err(e)
            }
        }
    }

    async fn answer(&self, offer: RTCSessionDescription, relay: &SignalingRelay) -> Result<()> {
        self.engine.set_remote_description(offer).await?;
        let answer = self.engine.create_answer().await?;
        self.engine.set_local_description(answer.clone()).await?;
        self.advance(ReceiverState::OfferReceived, ReceiverState::AnswerCreated)?;

        relay.enqueue(Envelope::answer(answer)).await?;
        self.advance(ReceiverState::AnswerCreated, ReceiverState::AnswerSent)?;
        self.advance(ReceiverState::AnswerSent, ReceiverState::Negotiating)
    }

    fn advance(&self, from: ReceiverState, to: ReceiverState) -> Result<()> {
        self.state
            .transition(&[from], to)
            .map(|_| ())
            .map_err(|s| self.state.rejected("answer offer", s))
    }

    pub async fn close(&self) -> Result<()> {
        let result = self.engine.close().await;
        self.state.apply_link(LinkState::Closed);
        debug!("{}: Receiver session closed", self.participant_id);
        result
    }
}
