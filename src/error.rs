#![forbid(unsafe_code)]

// Error taxonomy for the participant simulation engine

use thiserror::Error;

/// Errors raised by a simulated participant.
///
/// Only `Connection` during connection setup is fatal to a participant; every other
/// variant abandons the single operation that produced it.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid server address: {0}")]
    Address(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Media write error: {0}")]
    MediaWrite(String),

    #[error("Signaling relay closed")]
    RelayClosed,

    #[error("{role} session cannot {operation} in state {state}")]
    InvalidTransition {
        role: &'static str,
        operation: &'static str,
        state: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl From<webrtc::Error> for HarnessError {
    fn from(e: webrtc::Error) -> Self {
        HarnessError::Negotiation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
