#![forbid(unsafe_code)]

// webrtc-rs backed negotiation engine: one peer connection per session role

use super::{
    LinkState, LinkStateHandler, NegotiationEngine, PeerFactory, RemoteTrackHandler,
    RemoteTrackInfo, SenderPeer,
};
use crate::error::Result;
use crate::media::OutboundTracks;
use crate::metrics::ParticipantMetrics;
use crate::signaling::PeerRole;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

type TrackSlot = Arc<Mutex<Option<RemoteTrackHandler>>>;

/// One webrtc-rs peer connection behind the negotiation seam
pub struct WebRtcPeer {
    participant_id: String,
    role: PeerRole,
    peer_connection: Arc<RTCPeerConnection>,
    track_observer: TrackSlot,
}

impl WebRtcPeer {
    /// Peer connection with the default codecs and interceptors and no ICE servers
    async fn connect(participant_id: &str, role: PeerRole) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![],
            ..Default::default()
        };
        let peer_connection = Arc::new(api.new_peer_connection(config).await?);

        let cid = participant_id.to_string();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                let cid = cid.clone();
                Box::pin(async move {
                    debug!("{}: {:?} peer ICE state: {:?}", cid, role, state);
                })
            },
        ));

        debug!("{}: Created {:?} peer connection", participant_id, role);
        Ok(Self {
            participant_id: participant_id.to_string(),
            role,
            peer_connection,
            track_observer: Arc::new(Mutex::new(None)),
        })
    }

    /// Sender peer: send-only Opus and VP8 tracks are attached before any offer is created
    pub async fn sender(participant_id: &str) -> Result<(Self, OutboundTracks)> {
        let peer = Self::connect(participant_id, PeerRole::Sender).await?;

        let audio = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            format!("audio-{}", participant_id),
            format!("stream-{}", participant_id),
        ));
        peer.add_send_only(Arc::clone(&audio) as Arc<dyn TrackLocal + Send + Sync>, "audio")
            .await?;

        let video = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            format!("video-{}", participant_id),
            format!("stream-{}", participant_id),
        ));
        peer.add_send_only(Arc::clone(&video) as Arc<dyn TrackLocal + Send + Sync>, "video")
            .await?;

        info!("{}: Audio and video tracks attached to sender peer", participant_id);
        Ok((peer, OutboundTracks { audio, video }))
    }

    /// Receiver peer: every inbound track is announced and drained into `metrics`
    pub async fn receiver(participant_id: &str, metrics: Arc<ParticipantMetrics>) -> Result<Self> {
        let peer = Self::connect(participant_id, PeerRole::Receiver).await?;

        let cid = participant_id.to_string();
        let observer = Arc::clone(&peer.track_observer);
        peer.peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let cid = cid.clone();
            let metrics = Arc::clone(&metrics);
            let observer = Arc::clone(&observer);
            Box::pin(async move {
                let ssrc = track.ssrc();
                let info = RemoteTrackInfo {
                    kind: track.kind().to_string(),
                    codec: track.codec().capability.mime_type,
                    ssrc,
                };
                if let Ok(slot) = observer.lock() {
                    if let Some(handler) = slot.as_ref() {
                        handler(info);
                    }
                }

                // on_track holds its handler lock while this future runs; read elsewhere
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 1500];
                    let mut count = 0u64;
                    while let Ok((packet, _attrs)) = track.read(&mut buf).await {
                        count += 1;
                        metrics.record_packet_received(packet.payload.len());
                    }
                    debug!("{}: Track stopped (ssrc={}), received {} packets", cid, ssrc, count);
                });
            })
        }));

        Ok(peer)
    }

    async fn add_send_only(&self, track: Arc<dyn TrackLocal + Send + Sync>, label: &'static str) -> Result<()> {
        let transceiver = self
            .peer_connection
            .add_transceiver_from_track(
                track,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: vec![],
                }),
            )
            .await?;

        // Interceptors only run while RTCP is being read
        let rtp_sender = transceiver.sender().await;
        let cid = self.participant_id.clone();
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
            debug!("{}: {} RTCP reader stopped", cid, label);
        });
        Ok(())
    }
}

#[async_trait]
impl NegotiationEngine for WebRtcPeer {
    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        Ok(self.peer_connection.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription> {
        Ok(self.peer_connection.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()> {
        Ok(self.peer_connection.set_local_description(desc).await?)
    }

    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        Ok(self.peer_connection.set_remote_description(desc).await?)
    }

    fn on_link_state(&self, handler: LinkStateHandler) {
        self.peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                handler(LinkState::from(state));
                Box::pin(async {})
            },
        ));
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        if let Ok(mut slot) = self.track_observer.lock() {
            *slot = Some(handler);
        }
    }

    async fn close(&self) -> Result<()> {
        debug!("{}: Closing {:?} peer connection", self.participant_id, self.role);
        Ok(self.peer_connection.close().await?)
    }
}

/// Production factory: real webrtc-rs peers
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcFactory;

#[async_trait]
impl PeerFactory for WebRtcFactory {
    async fn sender_peer(&self, participant_id: &str) -> Result<SenderPeer> {
        let (peer, tracks) = WebRtcPeer::sender(participant_id).await?;
        Ok(SenderPeer {
            engine: Arc::new(peer),
            tracks,
        })
    }

    async fn receiver_peer(
        &self,
        participant_id: &str,
        metrics: Arc<ParticipantMetrics>,
    ) -> Result<Arc<dyn NegotiationEngine>> {
        let peer: Arc<dyn NegotiationEngine> =
            Arc::new(WebRtcPeer::receiver(participant_id, metrics).await?);
        Ok(peer)
    }
}
