#![forbid(unsafe_code)]

// Periodic synthetic audio/video schedules feeding a sender session's outbound tracks

use super::rtp::{rtp_header, RTP_HEADER_LEN};
use super::{MediaKind, MediaSink, OutboundTracks};
use crate::config::MediaProfile;
use crate::metrics::ParticipantMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

const VIDEO_PAYLOAD_TYPE: u8 = 96;
const AUDIO_PAYLOAD_TYPE: u8 = 97;
const VIDEO_TIMESTAMP_STEP: u32 = 3000; // 90 kHz clock at ~30 fps
const AUDIO_TIMESTAMP_STEP: u32 = 160;
const VIDEO_PLACEHOLDER: [u8; 3] = [0x00, 0x00, 0x00];
const AUDIO_PLACEHOLDER: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Packet counter state for one schedule
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub kind: MediaKind,
    pub payload_type: u8,
    pub interval: Duration,
    pub timestamp_step: u32,
    pub ssrc: u32,
    pub payload: [u8; 3],
    sequence: u16,
    timestamp: u32,
}

impl MediaStream {
    pub fn video() -> Self {
        Self {
            kind: MediaKind::Video,
            payload_type: VIDEO_PAYLOAD_TYPE,
            interval: Duration::from_millis(33),
            timestamp_step: VIDEO_TIMESTAMP_STEP,
            ssrc: 12345,
            payload: VIDEO_PLACEHOLDER,
            sequence: 0,
            timestamp: 0,
        }
    }

    pub fn audio() -> Self {
        Self {
            kind: MediaKind::Audio,
            payload_type: AUDIO_PAYLOAD_TYPE,
            interval: Duration::from_millis(20),
            timestamp_step: AUDIO_TIMESTAMP_STEP,
            ssrc: 67890,
            payload: AUDIO_PLACEHOLDER,
            sequence: 0,
            timestamp: 0,
        }
    }

    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn starting_at(mut self, sequence: u16, timestamp: u32) -> Self {
        self.sequence = sequence;
        self.timestamp = timestamp;
        self
    }

    /// Build the next packet and advance sequence and timestamp, wrapping on overflow.
    pub fn next_packet(&mut self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(RTP_HEADER_LEN + self.payload.len());
        packet.extend_from_slice(&rtp_header(
            self.payload_type,
            self.sequence,
            self.timestamp,
            self.ssrc,
        ));
        packet.extend_from_slice(&self.payload);
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(self.timestamp_step);
        packet
    }
}

/// Why a schedule stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleExit {
    Cancelled,
    WriteFailed(String),
}

/// Drive one schedule until cancellation or the first write failure.
///
/// The first tick fires one full period after start.
pub async fn run_schedule(
    participant_id: String,
    mut stream: MediaStream,
    sink: Arc<dyn MediaSink>,
    metrics: Arc<ParticipantMetrics>,
    mut shutdown: watch::Receiver<bool>,
) -> ScheduleExit {
    let mut ticker = interval_at(Instant::now() + stream.interval, stream.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!("{}: Starting {} schedule every {:?}", participant_id, stream.kind, stream.interval);

    loop {
        tokio::select! {
            _ = crate::cancelled(&mut shutdown) => {
                debug!("{}: {} schedule cancelled", participant_id, stream.kind);
                return ScheduleExit::Cancelled;
            }
            _ = ticker.tick() => {
                let packet = stream.next_packet();
                match sink.write_packet(&packet).await {
                    Ok(_) => {
                        metrics.record_media_sent(stream.kind, packet.len());
                        if metrics.mark_first_media_sent() {
                            info!("{}: First {} RTP packet sent", participant_id, stream.kind);
                        }
                    }
                    Err(e) => {
                        error!("{}: Failed to send {} RTP: {}", participant_id, stream.kind, e);
                        metrics.record_error(format!("{} schedule stopped: {}", stream.kind, e));
                        return ScheduleExit::WriteFailed(e.to_string());
                    }
                }
            }
        }
    }
}

/// The running audio and video schedules of one participant
pub struct MediaEmitter {
    participant_id: String,
    audio: Option<JoinHandle<ScheduleExit>>,
    video: Option<JoinHandle<ScheduleExit>>,
}

impl MediaEmitter {
    /// Spawn the enabled schedules. Each runs independently of the other.
    pub fn start(
        participant_id: &str,
        profile: &MediaProfile,
        tracks: &OutboundTracks,
        metrics: Arc<ParticipantMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let video = profile.video_enabled.then(|| {
            let stream = MediaStream::video()
                .with_interval(profile.video_interval)
                .with_ssrc(profile.video_ssrc);
            tokio::spawn(run_schedule(
                participant_id.to_string(),
                stream,
                Arc::clone(&tracks.video),
                Arc::clone(&metrics),
                shutdown.clone(),
            ))
        });

        let audio = profile.audio_enabled.then(|| {
            let stream = MediaStream::audio()
                .with_interval(profile.audio_interval)
                .with_ssrc(profile.audio_ssrc);
            tokio::spawn(run_schedule(
                participant_id.to_string(),
                stream,
                Arc::clone(&tracks.audio),
                Arc::clone(&metrics),
                shutdown.clone(),
            ))
        });

        Self {
            participant_id: participant_id.to_string(),
            audio,
            video,
        }
    }

    /// Wait for both schedules to finish. Returns `(audio, video)` exits; `None` for a disabled schedule.
    pub async fn join(self) -> (Option<ScheduleExit>, Option<ScheduleExit>) {
        let audio = match self.audio {
            Some(handle) => Self::settle(&self.participant_id, handle).await,
            None => None,
        };
        let video = match self.video {
            Some(handle) => Self::settle(&self.participant_id, handle).await,
            None => None,
        };
        (audio, video)
    }

    async fn settle(participant_id: &str, handle: JoinHandle<ScheduleExit>) -> Option<ScheduleExit> {
        match handle.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!("{}: Media schedule task panicked: {}", participant_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::RtpHeaderFields;
    use crate::testing::{FailingSink, RecordingSink};

    fn metrics() -> Arc<ParticipantMetrics> {
        Arc::new(ParticipantMetrics::new("Name-0", "1000"))
    }

    #[test]
    fn test_video_packet_layout() {
        let mut stream = MediaStream::video();
        let first = stream.next_packet();
        let second = stream.next_packet();
        assert_eq!(first.len(), 15);
        assert_eq!(&first[12..], &[0x00, 0x00, 0x00]);

        let a = RtpHeaderFields::parse(&first).unwrap();
        let b = RtpHeaderFields::parse(&second).unwrap();
        assert_eq!(a.payload_type, 96);
        assert_eq!(a.ssrc, 12345);
        assert_eq!(b.sequence, a.sequence + 1);
        assert_eq!(b.timestamp, a.timestamp + 3000);
    }

    #[test]
    fn test_audio_packet_layout() {
        let mut stream = MediaStream::audio();
        stream.next_packet();
        let packet = stream.next_packet();
        let fields = RtpHeaderFields::parse(&packet).unwrap();
        assert_eq!(fields.payload_type, 97);
        assert_eq!(fields.ssrc, 67890);
        assert_eq!(fields.timestamp, 160);
        assert_eq!(&packet[12..], &[0xF8, 0xFF, 0xFE]);
    }

    #[test]
    fn test_sequence_and_timestamp_wrap() {
        let mut stream = MediaStream::video().starting_at(65535, u32::MAX - 1000);
        let last = RtpHeaderFields::parse(&stream.next_packet()).unwrap();
        let wrapped = RtpHeaderFields::parse(&stream.next_packet()).unwrap();
        assert_eq!(last.sequence, 65535);
        assert_eq!(wrapped.sequence, 0);
        assert_eq!(wrapped.timestamp, 1999);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_first_tick_after_one_period() {
        let sink = Arc::new(RecordingSink::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let started = Instant::now();
        let task = tokio::spawn(run_schedule(
            "Name-0".into(),
            MediaStream::video(),
            sink.clone(),
            metrics(),
            stop_rx,
        ));

        tokio::time::sleep(Duration::from_millis(33 * 6 + 5)).await;
        stop_tx.send(true).unwrap();
        assert_eq!(task.await.unwrap(), ScheduleExit::Cancelled);

        let times = sink.write_times();
        assert_eq!(times.len(), 6);
        assert_eq!(times[0] - started, Duration::from_millis(33));
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(33));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_stops_only_that_schedule() {
        let audio_sink = Arc::new(RecordingSink::default());
        let tracks = OutboundTracks {
            audio: audio_sink.clone(),
            video: Arc::new(FailingSink),
        };
        let m = metrics();
        let (stop_tx, stop_rx) = watch::channel(false);
        let emitter = MediaEmitter::start(
            "Name-0",
            &MediaProfile::default(),
            &tracks,
            Arc::clone(&m),
            stop_rx,
        );

        tokio::time::sleep(Duration::from_millis(205)).await;
        stop_tx.send(true).unwrap();
        let (audio, video) = emitter.join().await;

        assert_eq!(audio, Some(ScheduleExit::Cancelled));
        assert!(matches!(video, Some(ScheduleExit::WriteFailed(_))));
        assert_eq!(audio_sink.write_times().len(), 10);
        let packets = audio_sink.packets();
        let headers: Vec<RtpHeaderFields> =
            packets.iter().map(|p| RtpHeaderFields::parse(p).unwrap()).collect();
        assert_eq!(headers.iter().map(|h| h.sequence).collect::<Vec<_>>(), (0..10).collect::<Vec<u16>>());
        assert!(headers.iter().all(|h| h.payload_type == 97 && h.ssrc == 67890));
        assert!(packets.iter().all(|p| p[12..] == [0xF8, 0xFF, 0xFE]));
        assert_eq!(m.media_packets_sent(MediaKind::Audio), 10);
        assert_eq!(m.media_packets_sent(MediaKind::Video), 0);
        assert_eq!(m.error_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_schedule_is_not_spawned() {
        let tracks = OutboundTracks {
            audio: Arc::new(RecordingSink::default()),
            video: Arc::new(RecordingSink::default()),
        };
        let profile = MediaProfile {
            video_enabled: false,
            ..MediaProfile::default()
        };
        let (stop_tx, stop_rx) = watch::channel(false);
        let emitter = MediaEmitter::start("Name-0", &profile, &tracks, metrics(), stop_rx);
        stop_tx.send(true).unwrap();
        let (audio, video) = emitter.join().await;
        assert_eq!(audio, Some(ScheduleExit::Cancelled));
        assert_eq!(video, None);
    }
}
