#![forbid(unsafe_code)]

// Fixed-format RTP header synthesis for synthetic media packets

/// Length of a header with no CSRC list and no extension.
pub const RTP_HEADER_LEN: usize = 12;

/// V=2, P=0, X=0, CC=0
const VERSION_FLAGS: u8 = 0x80;

/// Build a 12-byte RTP header. Multi-byte fields are big endian.
pub fn rtp_header(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> [u8; RTP_HEADER_LEN] {
    let mut header = [0u8; RTP_HEADER_LEN];
    header[0] = VERSION_FLAGS;
    header[1] = payload_type;
    header[2..4].copy_from_slice(&sequence.to_be_bytes());
    header[4..8].copy_from_slice(&timestamp.to_be_bytes());
    header[8..12].copy_from_slice(&ssrc.to_be_bytes());
    header
}

/// Header fields recovered from a synthesized packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeaderFields {
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeaderFields {
    /// Parse the fixed header at the start of `packet`.
    ///
    /// Returns `None` when the packet is too short or the version/flags byte is not `0x80`.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() < RTP_HEADER_LEN || packet[0] != VERSION_FLAGS {
            return None;
        }
        Some(Self {
            payload_type: packet[1],
            sequence: u16::from_be_bytes([packet[2], packet[3]]),
            timestamp: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            ssrc: u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
        })
    }
}
