#![forbid(unsafe_code)]

// Signaling module - envelope protocol, outbound relay and the WebSocket client connection

pub mod connection;
pub mod protocol;
pub mod relay;

pub use connection::{open, SignalingStream};
pub use protocol::{Envelope, PeerRole};
pub use relay::{run_relay, SignalingRelay};
