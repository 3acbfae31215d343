#![forbid(unsafe_code)]

// meetsim library - simulated meeting participants for signaling-server load tests

pub mod auth;
pub mod config;
pub mod error;
pub mod harness;
pub mod media;
pub mod metrics;
pub mod negotiation;
pub mod participant;
pub mod signaling;

#[cfg(test)]
pub(crate) mod testing;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use harness::Harness;

/// Resolves once `shutdown` flips to true or its sender is gone.
///
/// Yields `()` so no watch guard is held across the arm that wins a `select!`.
pub(crate) async fn cancelled(shutdown: &mut tokio::sync::watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}
