#![forbid(unsafe_code)]

// Test doubles: scripted peer engine, recording media sinks, scripted signaling frames

use crate::error::{HarnessError, Result};
use crate::media::{MediaSink, OutboundTracks};
use crate::metrics::ParticipantMetrics;
use crate::negotiation::{
    LinkState, LinkStateHandler, NegotiationEngine, PeerFactory, RemoteTrackHandler,
    RemoteTrackInfo, SenderPeer,
};
use async_trait::async_trait;
use futures_util::{stream, Sink, Stream};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Build a description without parsing the SDP body
pub fn description(sdp_type: RTCSdpType, sdp: &str) -> RTCSessionDescription {
    let mut desc = RTCSessionDescription::default();
    desc.sdp_type = sdp_type;
    desc.sdp = sdp.to_string();
    desc
}

/// Scripted engine that records every description it is handed
#[derive(Default)]
pub struct FakeEngine {
    offers: AtomicUsize,
    answers: AtomicUsize,
    local: Mutex<Vec<RTCSessionDescription>>,
    remote: Mutex<Vec<RTCSessionDescription>>,
    fail_remote: AtomicBool,
    fail_answer: AtomicBool,
    closed: AtomicBool,
    link_handler: Mutex<Option<LinkStateHandler>>,
    track_handler: Mutex<Option<RemoteTrackHandler>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn local_descriptions(&self) -> Vec<RTCSessionDescription> {
        self.local.lock().unwrap().clone()
    }

    pub fn remote_descriptions(&self) -> Vec<RTCSessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    pub fn fail_next_remote_description(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_create_answer(&self) {
        self.fail_answer.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn has_track_observer(&self) -> bool {
        self.track_handler.lock().unwrap().is_some()
    }

    pub fn emit_link_state(&self, state: LinkState) {
        if let Some(handler) = self.link_handler.lock().unwrap().as_ref() {
            handler(state);
        }
    }

    pub fn emit_remote_track(&self, info: RemoteTrackInfo) {
        if let Some(handler) = self.track_handler.lock().unwrap().as_ref() {
            handler(info);
        }
    }
}

#[async_trait]
impl NegotiationEngine for FakeEngine {
    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst);
        Ok(description(RTCSdpType::Offer, &format!("fake-offer-{}", n)))
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription> {
        if self.fail_answer.swap(false, Ordering::SeqCst) {
            return Err(HarnessError::Negotiation("scripted answer failure".into()));
        }
        let n = self.answers.fetch_add(1, Ordering::SeqCst);
        Ok(description(RTCSdpType::Answer, &format!("fake-answer-{}", n)))
    }

    async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()> {
        self.local.lock().unwrap().push(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        if self.fail_remote.swap(false, Ordering::SeqCst) {
            return Err(HarnessError::Negotiation("scripted remote description failure".into()));
        }
        self.remote.lock().unwrap().push(desc);
        Ok(())
    }

    fn on_link_state(&self, handler: LinkStateHandler) {
        *self.link_handler.lock().unwrap() = Some(handler);
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        *self.track_handler.lock().unwrap() = Some(handler);
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Media sink that keeps every packet with its (virtual) write time
#[derive(Default)]
pub struct RecordingSink {
    writes: Mutex<Vec<(Instant, Vec<u8>)>>,
}

impl RecordingSink {
    pub fn write_times(&self) -> Vec<Instant> {
        self.writes.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn packets(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }
}

#[async_trait]
impl MediaSink for RecordingSink {
    async fn write_packet(&self, packet: &[u8]) -> Result<usize> {
        self.writes.lock().unwrap().push((Instant::now(), packet.to_vec()));
        Ok(packet.len())
    }
}

/// Media sink whose every write fails
pub struct FailingSink;

#[async_trait]
impl MediaSink for FailingSink {
    async fn write_packet(&self, _packet: &[u8]) -> Result<usize> {
        Err(HarnessError::MediaWrite("track closed".into()))
    }
}

/// Signaling sink whose transport is already gone
pub struct ClosedSink;

impl Sink<Message> for ClosedSink {
    type Error = tungstenite::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Err(tungstenite::Error::ConnectionClosed))
    }

    fn start_send(self: Pin<&mut Self>, _item: Message) -> std::result::Result<(), Self::Error> {
        Err(tungstenite::Error::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Signaling sink whose peer never reads: every write stays pending
pub struct StalledSink;

impl Sink<Message> for StalledSink {
    type Error = tungstenite::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _item: Message) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Pending
    }
}

/// Inbound frames delivered in order, then end of stream
pub fn scripted_frames(
    frames: Vec<Message>,
) -> impl Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin {
    stream::iter(frames.into_iter().map(Ok))
}

/// Factory handing out fake engines and recording sinks the test can inspect afterwards
#[derive(Default)]
pub struct FakeFactory {
    pub sender_engine: Arc<FakeEngine>,
    pub receiver_engine: Arc<FakeEngine>,
    pub audio: Arc<RecordingSink>,
    pub video: Arc<RecordingSink>,
}

#[async_trait]
impl PeerFactory for FakeFactory {
    async fn sender_peer(&self, _participant_id: &str) -> Result<SenderPeer> {
        Ok(SenderPeer {
            engine: self.sender_engine.clone(),
            tracks: OutboundTracks {
                audio: self.audio.clone(),
                video: self.video.clone(),
            },
        })
    }

    async fn receiver_peer(
        &self,
        _participant_id: &str,
        _metrics: Arc<ParticipantMetrics>,
    ) -> Result<Arc<dyn NegotiationEngine>> {
        let engine: Arc<dyn NegotiationEngine> = self.receiver_engine.clone();
        Ok(engine)
    }
}
