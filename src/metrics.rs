#![forbid(unsafe_code)]

// Per-participant health counters and harness-wide summary.

use crate::media::MediaKind;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Health report for one simulated participant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantReport {
    pub participant_id: String,
    pub meeting_id: String,
    pub connection_successful: bool,
    pub connection_time_ms: u64,
    pub time_to_first_media_sent_ms: Option<u64>,
    pub envelopes_sent: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
    pub offers_received: u64,
    pub answers_received: u64,
    pub video_packets_sent: u64,
    pub audio_packets_sent: u64,
    pub total_bytes_sent: u64,
    pub total_packets_received: u64,
    pub total_bytes_received: u64,
    pub sender_state: String,
    pub receiver_state: String,
    pub errors: Vec<String>,
    pub session_duration_ms: u64,
}

/// Thread-safe health record shared by all tasks of one participant
pub struct ParticipantMetrics {
    participant_id: String,
    meeting_id: String,
    start_time: Instant,
    connection_successful: AtomicBool,
    connection_time_ms: AtomicU64,
    first_media_sent: AtomicU64, // 0 = not set
    envelopes_sent: AtomicU64,
    frames_received: AtomicU64,
    malformed_frames: AtomicU64,
    offers_received: AtomicU64,
    answers_received: AtomicU64,
    video_packets_sent: AtomicU64,
    audio_packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    sender_state: Mutex<String>,
    receiver_state: Mutex<String>,
    errors: Mutex<Vec<String>>,
}

impl ParticipantMetrics {
    pub fn new(participant_id: impl Into<String>, meeting_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            meeting_id: meeting_id.into(),
            start_time: Instant::now(),
            connection_successful: AtomicBool::new(false),
            connection_time_ms: AtomicU64::new(0),
            first_media_sent: AtomicU64::new(0),
            envelopes_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            offers_received: AtomicU64::new(0),
            answers_received: AtomicU64::new(0),
            video_packets_sent: AtomicU64::new(0),
            audio_packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            sender_state: Mutex::new(String::from("Idle")),
            receiver_state: Mutex::new(String::from("Idle")),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn mark_connection_successful(&self) {
        self.connection_successful.store(true, Ordering::SeqCst);
        let elapsed = self.start_time.elapsed().as_millis() as u64;
        self.connection_time_ms.store(elapsed, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connection_successful.load(Ordering::SeqCst)
    }

    /// Returns true only for the call that recorded the first packet.
    pub fn mark_first_media_sent(&self) -> bool {
        // max(1) keeps a sub-millisecond first packet distinguishable from "never"
        let elapsed = (self.start_time.elapsed().as_millis() as u64).max(1);
        self.first_media_sent
            .compare_exchange(0, elapsed, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn record_envelope_sent(&self) {
        self.envelopes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_frame(&self, reason: String) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
        self.record_error(reason);
    }

    pub fn record_offer_received(&self) {
        self.offers_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_answer_received(&self) {
        self.answers_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_media_sent(&self, kind: MediaKind, size: usize) {
        match kind {
            MediaKind::Video => self.video_packets_sent.fetch_add(1, Ordering::Relaxed),
            MediaKind::Audio => self.audio_packets_sent.fetch_add(1, Ordering::Relaxed),
        };
        self.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn media_packets_sent(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Video => self.video_packets_sent.load(Ordering::Relaxed),
            MediaKind::Audio => self.audio_packets_sent.load(Ordering::Relaxed),
        }
    }

    pub fn record_packet_received(&self, size: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn set_sender_state(&self, state: &str) {
        if let Ok(mut s) = self.sender_state.lock() {
            *s = state.to_string();
        }
    }

    pub fn set_receiver_state(&self, state: &str) {
        if let Ok(mut s) = self.receiver_state.lock() {
            *s = state.to_string();
        }
    }

    pub fn record_error(&self, error: String) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(error);
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().map(|e| e.len()).unwrap_or_default()
    }

    /// Snapshot the counters (sync, safe to call from any thread)
    pub fn generate_report(&self) -> ParticipantReport {
        let first_sent = self.first_media_sent.load(Ordering::SeqCst);
        ParticipantReport {
            participant_id: self.participant_id.clone(),
            meeting_id: self.meeting_id.clone(),
            connection_successful: self.connection_successful.load(Ordering::SeqCst),
            connection_time_ms: self.connection_time_ms.load(Ordering::SeqCst),
            time_to_first_media_sent_ms: if first_sent > 0 { Some(first_sent) } else { None },
            envelopes_sent: self.envelopes_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            offers_received: self.offers_received.load(Ordering::Relaxed),
            answers_received: self.answers_received.load(Ordering::Relaxed),
            video_packets_sent: self.video_packets_sent.load(Ordering::Relaxed),
            audio_packets_sent: self.audio_packets_sent.load(Ordering::Relaxed),
            total_bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            total_packets_received: self.packets_received.load(Ordering::Relaxed),
            total_bytes_received: self.bytes_received.load(Ordering::Relaxed),
            sender_state: self.sender_state.lock().map(|s| s.clone()).unwrap_or_default(),
            receiver_state: self.receiver_state.lock().map(|s| s.clone()).unwrap_or_default(),
            errors: self.errors.lock().map(|e| e.clone()).unwrap_or_default(),
            session_duration_ms: self.start_time.elapsed().as_millis() as u64,
        }
    }
}

/// Aggregates reports from every participant in a run
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessSummary {
    pub total_participants: usize,
    pub successful_connections: usize,
    pub failed_connections: usize,
    pub average_connection_time_ms: u64,
    pub p50_connection_time_ms: u64,
    pub p95_connection_time_ms: u64,
    pub p99_connection_time_ms: u64,
    pub senders_negotiating: usize,
    pub senders_connected: usize,
    pub receivers_offered: usize,
    pub total_envelopes_sent: u64,
    pub total_malformed_frames: u64,
    pub total_video_packets_sent: u64,
    pub total_audio_packets_sent: u64,
    pub total_bytes_sent: u64,
    pub total_packets_received: u64,
    pub total_errors: usize,
}

impl HarnessSummary {
    pub fn from_reports(reports: &[ParticipantReport]) -> Self {
        if reports.is_empty() {
            return Self::default();
        }

        let total_participants = reports.len();
        let successful_connections = reports.iter().filter(|r| r.connection_successful).count();

        let mut connection_times: Vec<u64> = reports
            .iter()
            .filter(|r| r.connection_successful)
            .map(|r| r.connection_time_ms)
            .collect();
        connection_times.sort_unstable();

        let average_connection_time_ms = if connection_times.is_empty() {
            0
        } else {
            connection_times.iter().sum::<u64>() / connection_times.len() as u64
        };

        let senders_connected = reports.iter().filter(|r| r.sender_state == "Connected").count();
        let senders_negotiating = reports.iter().filter(|r| r.sender_state == "Negotiating").count();
        let receivers_offered = reports.iter().filter(|r| r.offers_received > 0).count();

        Self {
            total_participants,
            successful_connections,
            failed_connections: total_participants - successful_connections,
            average_connection_time_ms,
            p50_connection_time_ms: percentile(&connection_times, 0.50),
            p95_connection_time_ms: percentile(&connection_times, 0.95),
            p99_connection_time_ms: percentile(&connection_times, 0.99),
            senders_negotiating,
            senders_connected,
            receivers_offered,
            total_envelopes_sent: reports.iter().map(|r| r.envelopes_sent).sum(),
            total_malformed_frames: reports.iter().map(|r| r.malformed_frames).sum(),
            total_video_packets_sent: reports.iter().map(|r| r.video_packets_sent).sum(),
            total_audio_packets_sent: reports.iter().map(|r| r.audio_packets_sent).sum(),
            total_bytes_sent: reports.iter().map(|r| r.total_bytes_sent).sum(),
            total_packets_received: reports.iter().map(|r| r.total_packets_received).sum(),
            total_errors: reports.iter().map(|r| r.errors.len()).sum(),
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Load Test Summary ===");
        println!("Participants: {}", self.total_participants);
        println!("Successful Connections: {}", self.successful_connections);
        println!("Failed Connections: {}", self.failed_connections);
        println!("\nConnection Time:");
        println!("  Average: {} ms", self.average_connection_time_ms);
        println!("  P50: {} ms", self.p50_connection_time_ms);
        println!("  P95: {} ms", self.p95_connection_time_ms);
        println!("  P99: {} ms", self.p99_connection_time_ms);
        println!("\nNegotiation:");
        println!("  Envelopes Sent: {}", self.total_envelopes_sent);
        println!("  Senders Negotiating: {}", self.senders_negotiating);
        println!("  Senders Connected: {}", self.senders_connected);
        println!("  Receivers Offered: {}", self.receivers_offered);
        println!("  Malformed Frames: {}", self.total_malformed_frames);
        println!("\nMedia Statistics:");
        println!("  Video Packets Sent: {}", self.total_video_packets_sent);
        println!("  Audio Packets Sent: {}", self.total_audio_packets_sent);
        println!("  Total Bytes Sent: {} ({:.2} MB)", self.total_bytes_sent, self.total_bytes_sent as f64 / 1_000_000.0);
        println!("  Remote Packets Received: {}", self.total_packets_received);
        println!("\nTotal Errors: {}", self.total_errors);
        println!("========================\n");
    }
}

fn percentile(sorted_data: &[u64], p: f64) -> u64 {
    if sorted_data.is_empty() {
        return 0;
    }
    let idx = (p * (sorted_data.len() - 1) as f64).round() as usize;
    sorted_data[idx.min(sorted_data.len() - 1)]
}
