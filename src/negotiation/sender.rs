#![forbid(unsafe_code)]

// Sender session: one offer per lifetime, completed by exactly one answer

use super::{LinkState, NegotiationEngine, SessionState, StateCell};
use crate::error::Result;
use crate::metrics::ParticipantMetrics;
use crate::signaling::{Envelope, SignalingRelay};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    OfferCreated,
    OfferSent,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

impl SessionState for SenderState {
    const ROLE: &'static str = "sender";

    fn after_link(self, link: LinkState) -> Option<Self> {
        match (self, link) {
            (SenderState::Closed, _) => None,
            (_, LinkState::Closed) => Some(SenderState::Closed),
            (SenderState::Failed, _) => None,
            (_, LinkState::Failed | LinkState::Disconnected) => Some(SenderState::Failed),
            (SenderState::Negotiating, LinkState::Connected) => Some(SenderState::Connected),
            _ => None,
        }
    }

    fn record(self, metrics: &ParticipantMetrics) {
        metrics.set_sender_state(&format!("{:?}", self));
    }
}

pub struct SenderSession {
    participant_id: String,
    engine: Arc<dyn NegotiationEngine>,
    state: Arc<StateCell<SenderState>>,
    metrics: Arc<ParticipantMetrics>,
    /// Local offer; the lock also serializes session operations
    offer: Mutex<Option<RTCSessionDescription>>,
}

impl SenderSession {
    pub fn new(
        participant_id: &str,
        engine: Arc<dyn NegotiationEngine>,
        metrics: Arc<ParticipantMetrics>,
    ) -> Self {
        let state = StateCell::new(participant_id, SenderState::Idle, Arc::clone(&metrics));
        let observer = Arc::clone(&state);
        engine.on_link_state(Box::new(move |link| observer.apply_link(link)));

        Self {
            participant_id: participant_id.to_string(),
            engine,
            state,
            metrics,
            offer: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SenderState {
        self.state.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<SenderState> {
        self.state.subscribe()
    }

    /// Create the offer and install it as the local description. Idle -> OfferCreated.
    pub async fn create_offer(&self) -> Result<()> {
        let mut slot = self.offer.lock().await;
        let current = self.state.current();
        if current != SenderState::Idle {
            return Err(self.state.rejected("create offer", current));
        }

        let offer = self.engine.create_offer().await?;
        self.engine.set_local_description(offer.clone()).await?;
        self.state
            .transition(&[SenderState::Idle], SenderState::OfferCreated)
            .map_err(|s| self.state.rejected("create offer", s))?;

        debug!("{}: Sender offer created", self.participant_id);
        *slot = Some(offer);
        Ok(())
    }

    /// Enqueue the offer on the relay. OfferCreated -> OfferSent.
    pub async fn send_offer(&self, relay: &SignalingRelay) -> Result<()> {
        let slot = self.offer.lock().await;
        let offer = match (self.state.current(), slot.as_ref()) {
            (SenderState::OfferCreated, Some(offer)) => offer.clone(),
            (current, _) => return Err(self.state.rejected("send offer", current)),
        };

        self.state
            .transition(&[SenderState::OfferCreated], SenderState::OfferSent)
            .map_err(|s| self.state.rejected("send offer", s))?;

        if let Err(e) = relay.enqueue(Envelope::offer(offer)).await {
            let _ = self
                .state
                .transition(&[SenderState::OfferSent], SenderState::OfferCreated);
            return Err(e);
        }
        info!("{}: Offer sent", self.participant_id);
        Ok(())
    }

    /// Apply the remote answer. OfferSent -> Negotiating; any other state rejects it.
    pub async fn handle_answer(&self, answer: RTCSessionDescription) -> Result<()> {
        let _guard = self.offer.lock().await;
        self.metrics.record_answer_received();

        self.state
            .transition(&[SenderState::OfferSent], SenderState::Negotiating)
            .map_err(|s| self.state.rejected("accept answer", s))?;

        if let Err(e) = self.engine.set_remote_description(answer).await {
            // The engine never took the answer; a later one may still complete negotiation
            let _ = self
                .state
                .transition(&[SenderState::Negotiating], SenderState::OfferSent);
            return Err(e);
        }
        info!("{}: Answer applied, sender negotiating", self.participant_id);
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        let result = self.engine.close().await;
        self.state.apply_link(LinkState::Closed);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use crate::testing::{description, FakeEngine};
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;

    fn session(engine: &Arc<FakeEngine>) -> (SenderSession, Arc<ParticipantMetrics>) {
        let metrics = Arc::new(ParticipantMetrics::new("Name-0", "1000"));
        let session = SenderSession::new("Name-0", engine.clone(), Arc::clone(&metrics));
        (session, metrics)
    }

    fn answer() -> RTCSessionDescription {
        description(RTCSdpType::Answer, "v=0 answer")
    }

    type Offered = (
        SenderSession,
        Arc<ParticipantMetrics>,
        tokio::sync::mpsc::Receiver<Envelope>,
        SignalingRelay,
    );

    async fn offered(engine: &Arc<FakeEngine>) -> Offered {
        let (session, metrics) = session(engine);
        let (relay, rx) = SignalingRelay::channel(10);
        session.create_offer().await.unwrap();
        session.send_offer(&relay).await.unwrap();
        (session, metrics, rx, relay)
    }

    #[tokio::test]
    async fn test_offer_flow() {
        let engine = Arc::new(FakeEngine::new());
        let (session, metrics, mut rx, _relay) = offered(&engine).await;

        assert_eq!(session.state(), SenderState::OfferSent);
        assert_eq!(engine.local_descriptions().len(), 1);
        match rx.try_recv().unwrap() {
            Envelope::Offer { peer_role, data } => {
                assert_eq!(peer_role, crate::signaling::PeerRole::Sender);
                assert_eq!(data.sdp_type, RTCSdpType::Offer);
            }
            other => panic!("unexpected envelope {:?}", other),
        }
        assert_eq!(metrics.generate_report().sender_state, "OfferSent");
    }

    #[tokio::test]
    async fn test_only_one_offer_per_lifetime() {
        let engine = Arc::new(FakeEngine::new());
        let (session, _metrics, _rx, relay) = offered(&engine).await;

        let again = session.create_offer().await;
        assert!(matches!(again, Err(HarnessError::InvalidTransition { .. })));
        let resend = session.send_offer(&relay).await;
        assert!(matches!(resend, Err(HarnessError::InvalidTransition { .. })));
        assert_eq!(engine.offers_created(), 1);
    }

    #[tokio::test]
    async fn test_send_before_create_is_rejected() {
        let engine = Arc::new(FakeEngine::new());
        let (session, _metrics) = session(&engine);
        let (relay, _rx) = SignalingRelay::channel(10);
        let result = session.send_offer(&relay).await;
        assert!(matches!(result, Err(HarnessError::InvalidTransition { .. })));
        assert_eq!(session.state(), SenderState::Idle);
    }

    #[tokio::test]
    async fn test_without_answer_stays_offer_sent() {
        let engine = Arc::new(FakeEngine::new());
        let (session, _metrics, _rx, _relay) = offered(&engine).await;
        tokio::task::yield_now().await;
        assert_eq!(session.state(), SenderState::OfferSent);
        assert!(engine.remote_descriptions().is_empty());
    }

    #[tokio::test]
    async fn test_answer_moves_to_negotiating_then_connected() {
        let engine = Arc::new(FakeEngine::new());
        let (session, metrics, _rx, _relay) = offered(&engine).await;

        session.handle_answer(answer()).await.unwrap();
        assert_eq!(session.state(), SenderState::Negotiating);
        assert_eq!(engine.remote_descriptions().len(), 1);

        engine.emit_link_state(LinkState::Connected);
        assert_eq!(session.state(), SenderState::Connected);
        assert_eq!(metrics.generate_report().sender_state, "Connected");
    }

    #[tokio::test]
    async fn test_duplicate_answer_rejected() {
        let engine = Arc::new(FakeEngine::new());
        let (session, metrics, _rx, _relay) = offered(&engine).await;

        session.handle_answer(answer()).await.unwrap();
        let duplicate = session.handle_answer(answer()).await;
        assert!(matches!(duplicate, Err(HarnessError::InvalidTransition { .. })));
        assert_eq!(engine.remote_descriptions().len(), 1);
        assert_eq!(metrics.generate_report().answers_received, 2);
    }

    #[tokio::test]
    async fn test_answer_before_offer_rejected() {
        let engine = Arc::new(FakeEngine::new());
        let (session, _metrics) = session(&engine);
        let result = session.handle_answer(answer()).await;
        assert!(matches!(result, Err(HarnessError::InvalidTransition { .. })));
        assert_eq!(session.state(), SenderState::Idle);
    }

    #[tokio::test]
    async fn test_rejected_answer_can_be_retried() {
        let engine = Arc::new(FakeEngine::new());
        let (session, _metrics, _rx, _relay) = offered(&engine).await;

        engine.fail_next_remote_description();
        assert!(matches!(
            session.handle_answer(answer()).await,
            Err(HarnessError::Negotiation(_))
        ));
        assert_eq!(session.state(), SenderState::OfferSent);

        session.handle_answer(answer()).await.unwrap();
        assert_eq!(session.state(), SenderState::Negotiating);
    }

    #[tokio::test]
    async fn test_link_failures_are_terminal() {
        let engine = Arc::new(FakeEngine::new());
        let (session, _metrics, _rx, _relay) = offered(&engine).await;
        session.handle_answer(answer()).await.unwrap();

        engine.emit_link_state(LinkState::Disconnected);
        assert_eq!(session.state(), SenderState::Failed);
        engine.emit_link_state(LinkState::Connected);
        assert_eq!(session.state(), SenderState::Failed);
        engine.emit_link_state(LinkState::Closed);
        assert_eq!(session.state(), SenderState::Closed);
    }

    #[tokio::test]
    async fn test_connected_ignored_before_negotiating() {
        let engine = Arc::new(FakeEngine::new());
        let (session, _metrics, _rx, _relay) = offered(&engine).await;
        engine.emit_link_state(LinkState::Connected);
        assert_eq!(session.state(), SenderState::OfferSent);
    }

    #[tokio::test]
    async fn test_send_offer_on_closed_relay() {
        let engine = Arc::new(FakeEngine::new());
        let (session, _metrics) = session(&engine);
        let (relay, rx) = SignalingRelay::channel(10);
        drop(rx);
        session.create_offer().await.unwrap();
        let result = session.send_offer(&relay).await;
        assert!(matches!(result, Err(HarnessError::RelayClosed)));
        assert_eq!(session.state(), SenderState::OfferCreated);
    }

    #[tokio::test]
    async fn test_close_marks_closed() {
        let engine = Arc::new(FakeEngine::new());
        let (session, metrics) = session(&engine);
        session.close().await.unwrap();
        assert!(engine.is_closed());
        assert_eq!(session.state(), SenderState::Closed);
        assert_eq!(metrics.generate_report().sender_state, "Closed");
    }
}
