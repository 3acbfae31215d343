#![forbid(unsafe_code)]

// Synthetic media: RTP header synthesis and the periodic audio/video emitter

pub mod emitter;
pub mod rtp;

pub use emitter::{MediaEmitter, MediaStream, ScheduleExit};
pub use rtp::{rtp_header, RtpHeaderFields, RTP_HEADER_LEN};

use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Outbound media channel a schedule writes raw RTP packets into
#[async_trait]
pub trait MediaSink: Send + Sync {
    async fn write_packet(&self, packet: &[u8]) -> Result<usize>;
}

#[async_trait]
impl MediaSink for TrackLocalStaticRTP {
    async fn write_packet(&self, packet: &[u8]) -> Result<usize> {
        TrackLocalWriter::write(self, packet)
            .await
            .map_err(|e| HarnessError::MediaWrite(e.to_string()))
    }
}

/// The pair of send-only tracks registered on a sender session
#[derive(Clone)]
pub struct OutboundTracks {
    pub audio: Arc<dyn MediaSink>,
    pub video: Arc<dyn MediaSink>,
}
