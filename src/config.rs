#![forbid(unsafe_code)]

// Harness configuration: defaults, environment overrides, then command-line flags

use crate::error::Result;
use std::time::Duration;
use url::Url;

/// Synthetic media schedule settings
#[derive(Debug, Clone)]
pub struct MediaProfile {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub video_interval: Duration, // ~30 fps
    pub audio_interval: Duration, // 20ms Opus frames
    pub video_ssrc: u32,
    pub audio_ssrc: u32,
}

impl Default for MediaProfile {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: true,
            video_interval: Duration::from_millis(33),
            audio_interval: Duration::from_millis(20),
            video_ssrc: 12345,
            audio_ssrc: 67890,
        }
    }
}

/// Top-level harness configuration
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Signaling server `host:port`
    pub server_addr: String,
    /// WebSocket path on the signaling server
    pub path: String,
    pub meeting_id: String,
    pub participants: usize,
    /// HS256 secret used to sign participant tokens
    pub jwt_secret: String,
    /// Bounded capacity of each participant's signaling relay
    pub relay_capacity: usize,
    /// Spread participant start-up across this window
    pub ramp_up: Duration,
    /// Stop after this long; `None` runs until Ctrl+C
    pub duration: Option<Duration>,
    /// Local port the harness binds while running
    pub listen_port: u16,
    pub media: MediaProfile,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8080".to_string(),
            path: "/websocket".to_string(),
            meeting_id: "1000".to_string(),
            participants: 1,
            jwt_secret: "12345".to_string(),
            relay_capacity: 10,
            ramp_up: Duration::ZERO,
            duration: None,
            listen_port: 3333,
            media: MediaProfile::default(),
        }
    }
}

/// What the caller should do after parsing the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgsOutcome {
    Run,
    Help,
}

impl HarnessConfig {
    /// Defaults overridden by `MEETSIM_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(server) = lookup("MEETSIM_SERVER") {
            config.server_addr = server;
        }
        if let Some(path) = lookup("MEETSIM_PATH") {
            config.path = path;
        }
        if let Some(meeting) = lookup("MEETSIM_MEETING") {
            config.meeting_id = meeting;
        }
        if let Some(n) = lookup("MEETSIM_PARTICIPANTS").and_then(|v| v.parse().ok()) {
            config.participants = n;
        }
        if let Some(secret) = lookup("MEETSIM_SECRET") {
            config.jwt_secret = secret;
        }
        if let Some(secs) = lookup("MEETSIM_DURATION").and_then(|v| v.parse::<u64>().ok()) {
            config.duration = Some(Duration::from_secs(secs));
        }
        config
    }

    /// Apply command-line flags on top of the current values. `args` excludes the program name.
    pub fn apply_args(&mut self, args: &[String]) -> ArgsOutcome {
        let mut i = 0;
        while i < args.len() {
            let value = args.get(i + 1);
            let consumed = match (args[i].as_str(), value) {
                ("--server" | "-s", Some(v)) => {
                    self.server_addr = v.clone();
                    2
                }
                ("--path", Some(v)) => {
                    self.path = v.clone();
                    2
                }
                ("--meeting" | "-m", Some(v)) => {
                    self.meeting_id = v.clone();
                    2
                }
                ("--participants" | "-n", Some(v)) => {
                    self.participants = v.parse().unwrap_or(self.participants);
                    2
                }
                ("--secret", Some(v)) => {
                    self.jwt_secret = v.clone();
                    2
                }
                ("--relay-capacity", Some(v)) => {
                    self.relay_capacity = v.parse::<usize>().unwrap_or(self.relay_capacity).max(1);
                    2
                }
                ("--ramp-up" | "-r", Some(v)) => {
                    if let Ok(secs) = v.parse::<u64>() {
                        self.ramp_up = Duration::from_secs(secs);
                    }
                    2
                }
                ("--duration" | "-d", Some(v)) => {
                    if let Ok(secs) = v.parse::<u64>() {
                        self.duration = Some(Duration::from_secs(secs));
                    }
                    2
                }
                ("--port" | "-p", Some(v)) => {
                    self.listen_port = v.parse().unwrap_or(self.listen_port);
                    2
                }
                ("--audio-only", _) => {
                    self.media.video_enabled = false;
                    self.media.audio_enabled = true;
                    1
                }
                ("--video-only", _) => {
                    self.media.audio_enabled = false;
                    self.media.video_enabled = true;
                    1
                }
                ("--help" | "-h", _) => return ArgsOutcome::Help,
                _ => 1,
            };
            i += consumed;
        }
        ArgsOutcome::Run
    }

    /// Signaling URL for one participant, carrying its token as the `auth` query credential
    pub fn signaling_url(&self, token: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("ws://{}{}", self.server_addr, self.path))?;
        url.query_pairs_mut().append_pair("auth", token);
        Ok(url)
    }

    /// Delay between consecutive participant spawns
    pub fn spawn_interval(&self) -> Duration {
        if self.participants > 1 {
            self.ramp_up / u32::try_from(self.participants).unwrap_or(u32::MAX)
        } else {
            Duration::ZERO
        }
    }
}

pub fn print_usage() {
    println!("meetsim - simulated meeting participants for signaling load tests");
    println!("\nUsage:");
    println!("  meetsim [OPTIONS]");
    println!("\nOptions:");
    println!("  -s, --server <HOST:PORT>   Signaling server address (default: 127.0.0.1:8080)");
    println!("  --path <PATH>              WebSocket path (default: /websocket)");
    println!("  -m, --meeting <ID>         Meeting identifier (default: 1000)");
    println!("  -n, --participants <N>     Simulated participants (default: 1)");
    println!("  --secret <SECRET>          Token signing secret (default: 12345)");
    println!("  --relay-capacity <N>       Outbound signaling queue size (default: 10)");
    println!("  -r, --ramp-up <SECS>       Spread participant start-up (default: 0)");
    println!("  -d, --duration <SECS>      Stop after SECS (default: run until Ctrl+C)");
    println!("  -p, --port <PORT>          Local health port (default: 3333)");
    println!("  --audio-only               Emit only audio packets");
    println!("  --video-only               Emit only video packets");
    println!("  -h, --help                 Print this help message");
    println!("\nEnvironment Variables:");
    println!("  MEETSIM_SERVER, MEETSIM_PATH, MEETSIM_MEETING, MEETSIM_PARTICIPANTS,");
    println!("  MEETSIM_SECRET, MEETSIM_DURATION");
    println!("  RUST_LOG=debug             Enable debug logging");
}
