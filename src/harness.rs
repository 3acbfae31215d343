#![forbid(unsafe_code)]

// Harness bootstrap: ramp participants up, expose a health endpoint, stop everyone, report

use crate::config::HarnessConfig;
use crate::error::Result;
use crate::metrics::{HarnessSummary, ParticipantMetrics, ParticipantReport};
use crate::negotiation::PeerFactory;
use crate::participant::{start_participant, ParticipantContext, ParticipantHandle};
use axum::{extract::State, routing::get, Json, Router};
use futures_util::future::join_all;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const RESULTS_FILE: &str = "meetsim_results.json";
pub const SUMMARY_FILE: &str = "meetsim_summary.json";

/// Live view of every participant, served on the listen port
#[derive(Clone)]
pub struct HealthState {
    meeting_id: String,
    participants: Arc<RwLock<Vec<Arc<ParticipantMetrics>>>>,
}

impl HealthState {
    pub fn new(meeting_id: &str) -> Self {
        Self {
            meeting_id: meeting_id.to_string(),
            participants: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn register(&self, metrics: Arc<ParticipantMetrics>) {
        let mut participants = self.participants.write().unwrap_or_else(|e| e.into_inner());
        participants.push(metrics);
    }

    /// `(total, connected)`
    pub fn counts(&self) -> (usize, usize) {
        let participants = self.participants.read().unwrap_or_else(|e| e.into_inner());
        let connected = participants.iter().filter(|m| m.is_connected()).count();
        (participants.len(), connected)
    }
}

async fn health_handler(State(state): State<HealthState>) -> Json<serde_json::Value> {
    let (participants, connected) = state.counts();
    Json(serde_json::json!({
        "status": "ok",
        "meetingId": state.meeting_id,
        "participants": participants,
        "connected": connected,
    }))
}

/// Bind `0.0.0.0:port` and serve `/health` until `shutdown` flips.
pub async fn serve_health(
    port: u16,
    state: HealthState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/health", get(health_handler))
        .with_state(state);

    let task = tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            crate::cancelled(&mut shutdown).await;
        });
        if let Err(e) = serve.await {
            error!("Health endpoint failed: {}", e);
        }
    });
    Ok((addr, task))
}

pub struct Harness {
    ctx: ParticipantContext,
}

impl Harness {
    pub fn new(config: HarnessConfig, factory: Arc<dyn PeerFactory>) -> Self {
        Self {
            ctx: ParticipantContext::new(config, factory),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.ctx.config
    }

    /// Run the whole load test until the configured duration elapses or `stop` resolves.
    ///
    /// Returns one report per participant, in spawn order; participants that never came
    /// online are reported as failed connections.
    pub async fn run<F>(&self, stop: F) -> Result<Vec<ParticipantReport>>
    where
        F: Future<Output = ()>,
    {
        let config = Arc::clone(&self.ctx.config);
        let health = HealthState::new(&config.meeting_id);
        let (health_tx, health_rx) = watch::channel(false);
        let (addr, health_task) = serve_health(config.listen_port, health.clone(), health_rx).await?;
        info!("Health endpoint listening on {}", addr);

        info!(
            "Starting {} participants against {} (meeting {}, ramp-up {:?})",
            config.participants, config.server_addr, config.meeting_id, config.ramp_up
        );

        tokio::pin!(stop);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let interval = config.spawn_interval();
        let mut starting = Vec::with_capacity(config.participants);
        let mut interrupted = false;

        for i in 0..config.participants {
            let name = format!("Name-{}", i);
            let metrics = Arc::new(ParticipantMetrics::new(name.as_str(), config.meeting_id.as_str()));
            health.register(Arc::clone(&metrics));

            let ctx = self.ctx.clone();
            let mut cancel = cancel_rx.clone();
            starting.push(tokio::spawn(async move {
                let result = tokio::select! {
                    result = start_participant(&ctx, &name, Arc::clone(&metrics)) => Some(result),
                    _ = crate::cancelled(&mut cancel) => None,
                };
                (metrics, result)
            }));

            if i + 1 < config.participants && !interval.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = &mut stop => {
                        warn!("Stop requested during ramp-up after {} participants", i + 1);
                        interrupted = true;
                        break;
                    }
                }
            }
        }

        if !interrupted {
            match config.duration {
                Some(duration) => tokio::select! {
                    _ = tokio::time::sleep(duration) => info!("Run duration of {:?} elapsed", duration),
                    _ = &mut stop => info!("Stop requested"),
                },
                None => {
                    (&mut stop).await;
                    info!("Stop requested");
                }
            }
        }

        // Starts still in flight are abandoned, not awaited
        let _ = cancel_tx.send(true);

        let mut entries: Vec<std::result::Result<ParticipantHandle, ParticipantReport>> =
            Vec::with_capacity(starting.len());
        for task in starting {
            match task.await {
                Ok((_, Some(Ok(handle)))) => entries.push(Ok(handle)),
                Ok((metrics, Some(Err(e)))) => {
                    error!("{}: Failed to start: {}", metrics.participant_id(), e);
                    metrics.record_error(e.to_string());
                    entries.push(Err(metrics.generate_report()));
                }
                Ok((metrics, None)) => {
                    warn!("{}: Start abandoned on stop", metrics.participant_id());
                    metrics.record_error("start abandoned on stop".to_string());
                    entries.push(Err(metrics.generate_report()));
                }
                Err(e) => error!("Participant start task panicked: {}", e),
            }
        }

        info!("Stopping {} participants", entries.len());
        let reports = join_all(entries.into_iter().map(|entry| async move {
            match entry {
                Ok(handle) => handle.stop().await,
                Err(report) => report,
            }
        }))
        .await;

        let _ = health_tx.send(true);
        if let Err(e) = health_task.await {
            error!("Health endpoint task panicked: {}", e);
        }
        Ok(reports)
    }
}

/// Write per-participant reports and the aggregate summary as pretty JSON into `dir`.
pub fn write_results(dir: &Path, reports: &[ParticipantReport]) -> Result<HarnessSummary> {
    let summary = HarnessSummary::from_reports(reports);
    std::fs::write(dir.join(RESULTS_FILE), serde_json::to_string_pretty(reports)?)?;
    std::fs::write(dir.join(SUMMARY_FILE), serde_json::to_string_pretty(&summary)?)?;
    info!("Results written to {} and {}", RESULTS_FILE, SUMMARY_FILE);
    Ok(summary)
}
