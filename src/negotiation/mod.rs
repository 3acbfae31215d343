#![forbid(unsafe_code)]

// Negotiation - sender/receiver session state machines over a pluggable peer engine

pub mod receiver;
pub mod sender;
pub mod webrtc_peer;

pub use receiver::{ReceiverSession, ReceiverState};
pub use sender::{SenderSession, SenderState};
pub use webrtc_peer::{WebRtcFactory, WebRtcPeer};

use crate::error::{HarnessError, Result};
use crate::media::OutboundTracks;
use crate::metrics::ParticipantMetrics;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Connection state reported by a peer engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for LinkState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => LinkState::Connecting,
            RTCPeerConnectionState::Connected => LinkState::Connected,
            RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
            RTCPeerConnectionState::Failed => LinkState::Failed,
            RTCPeerConnectionState::Closed => LinkState::Closed,
            _ => LinkState::New,
        }
    }
}

/// What a receiver learns about an inbound media track
#[derive(Debug, Clone)]
pub struct RemoteTrackInfo {
    pub kind: String,
    pub codec: String,
    pub ssrc: u32,
}

pub type LinkStateHandler = Box<dyn Fn(LinkState) + Send + Sync>;
pub type RemoteTrackHandler = Box<dyn Fn(RemoteTrackInfo) + Send + Sync>;

/// The offer/answer surface of one peer connection
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn create_offer(&self) -> Result<RTCSessionDescription>;
    async fn create_answer(&self) -> Result<RTCSessionDescription>;
    async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()>;
    /// Replace the connection-state observer
    fn on_link_state(&self, handler: LinkStateHandler);
    /// Replace the inbound-track observer
    fn on_remote_track(&self, handler: RemoteTrackHandler);
    async fn close(&self) -> Result<()>;
}

/// A sender engine together with the outbound tracks it negotiated
pub struct SenderPeer {
    pub engine: Arc<dyn NegotiationEngine>,
    pub tracks: OutboundTracks,
}

/// Builds the two peers a participant needs
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn sender_peer(&self, participant_id: &str) -> Result<SenderPeer>;
    async fn receiver_peer(
        &self,
        participant_id: &str,
        metrics: Arc<ParticipantMetrics>,
    ) -> Result<Arc<dyn NegotiationEngine>>;
}

/// Per-role state enum of a negotiation session
pub trait SessionState: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    const ROLE: &'static str;

    /// Next state after a link notification; `None` leaves the state alone.
    fn after_link(self, link: LinkState) -> Option<Self>;

    fn record(self, metrics: &ParticipantMetrics);
}

/// Observable session state, mirrored into the participant's metrics
pub(crate) struct StateCell<S: SessionState> {
    participant_id: String,
    tx: watch::Sender<S>,
    metrics: Arc<ParticipantMetrics>,
}

impl<S: SessionState> StateCell<S> {
    pub(crate) fn new(participant_id: &str, initial: S, metrics: Arc<ParticipantMetrics>) -> Arc<Self> {
        initial.record(&metrics);
        let (tx, _) = watch::channel(initial);
        Arc::new(Self {
            participant_id: participant_id.to_string(),
            tx,
            metrics,
        })
    }

    pub(crate) fn current(&self) -> S {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }

    /// Move to `to` if the current state is one of `from`. Returns the state actually left,
    /// or the blocking state.
    pub(crate) fn transition(&self, from: &[S], to: S) -> std::result::Result<S, S> {
        let mut outcome = Err(to);
        self.tx.send_if_modified(|state| {
            if from.contains(state) {
                outcome = Ok(*state);
                *state = to;
                to.record(&self.metrics);
                true
            } else {
                outcome = Err(*state);
                false
            }
        });
        if let Ok(previous) = outcome {
            debug!("{}: {} {:?} -> {:?}", self.participant_id, S::ROLE, previous, to);
        }
        outcome
    }

    pub(crate) fn rejected(&self, operation: &'static str, state: S) -> HarnessError {
        HarnessError::InvalidTransition {
            role: S::ROLE,
            operation,
            state: format!("{:?}", state),
        }
    }

    pub(crate) fn apply_link(&self, link: LinkState) {
        match link {
            LinkState::Connected => info!("{}: {} peer connected", self.participant_id, S::ROLE),
            LinkState::Disconnected => warn!("{}: {} peer disconnected", self.participant_id, S::ROLE),
            LinkState::Failed => error!("{}: {} peer failed", self.participant_id, S::ROLE),
            LinkState::Closed => debug!("{}: {} peer closed", self.participant_id, S::ROLE),
            other => debug!("{}: {} peer link {:?}", self.participant_id, S::ROLE, other),
        }

        self.tx.send_if_modified(|state| match state.after_link(link) {
            Some(next) if next != *state => {
                debug!("{}: {} {:?} -> {:?}", self.participant_id, S::ROLE, state, next);
                *state = next;
                next.record(&self.metrics);
                true
            }
            _ => false,
        });
    }
}
