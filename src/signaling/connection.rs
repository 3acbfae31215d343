#![forbid(unsafe_code)]

// Outbound WebSocket connection to the signaling server

use crate::error::Result;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

pub type SignalingStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the signaling socket. The URL already carries the `auth` credential.
pub async fn open(url: &Url) -> Result<SignalingStream> {
    debug!("Connecting to {}{}", url.host_str().unwrap_or_default(), url.path());
    let (stream, response) = connect_async(url.as_str()).await?;
    debug!("Signaling handshake completed with status {}", response.status());
    Ok(stream)
}
