#![forbid(unsafe_code)]

// Signaling protocol - the offer/answer envelope exchanged over the WebSocket

use crate::error::Result;
use serde::{Deserialize, Serialize};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Which of a participant's two peers produced an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Sender,
    Receiver,
}

/// One signaling frame.
///
/// Wire form: `{"type": "offer"|"answer", "peerType": ..., "data": "<json session description>"}`.
/// Frames with any other `type` deserialize as `Unknown`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Offer {
        #[serde(rename = "peerType")]
        peer_role: PeerRole,
        #[serde(with = "description_data")]
        data: RTCSessionDescription,
    },
    Answer {
        #[serde(rename = "peerType")]
        peer_role: PeerRole,
        #[serde(with = "description_data")]
        data: RTCSessionDescription,
    },
    #[serde(other)]
    Unknown,
}

impl Envelope {
    /// The sender peer's offer
    pub fn offer(data: RTCSessionDescription) -> Self {
        Envelope::Offer {
            peer_role: PeerRole::Sender,
            data,
        }
    }

    /// The receiver peer's answer
    pub fn answer(data: RTCSessionDescription) -> Self {
        Envelope::Answer {
            peer_role: PeerRole::Receiver,
            data,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Offer { .. } => "offer",
            Envelope::Answer { .. } => "answer",
            Envelope::Unknown => "unknown",
        }
    }

    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_frame(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// `data` is written as a JSON string holding the description; inbound frames may
/// also carry the description inline as an object.
mod description_data {
    use serde::{de, ser, Deserialize, Deserializer, Serializer};
    use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

    pub fn serialize<S>(desc: &RTCSessionDescription, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = serde_json::to_string(desc).map_err(ser::Error::custom)?;
        serializer.serialize_str(&encoded)
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Text(String),
        Inline(RTCSessionDescription),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<RTCSessionDescription, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Encoded::deserialize(deserializer)? {
            Encoded::Text(text) => serde_json::from_str(&text).map_err(de::Error::custom),
            Encoded::Inline(desc) => Ok(desc),
        }
    }
}
