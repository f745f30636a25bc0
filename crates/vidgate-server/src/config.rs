use anyhow::{bail, Result};

/// Gateway configuration, loaded from environment variables with
/// built-in defaults (signaling on 1988, ingest on 8554).
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP signaling bind address.
    pub http_host: String,
    pub http_port: u16,
    /// UDP ingest bind address.
    pub udp_host: String,
    pub udp_port: u16,
    pub rtp: RtpConfig,
    pub stun_servers: Vec<String>,
    pub turn_server: Option<TurnServer>,
}

/// Per-session RTP parameters. Every peer session shares these; only
/// SSRC and timestamps differ between sessions.
#[derive(Debug, Clone, Copy)]
pub struct RtpConfig {
    /// 7-bit RTP payload type.
    pub payload_type: u8,
    /// Fixed at 90 kHz for H.264.
    pub clock_rate: u32,
    /// Nominal ingest frame rate; sets the per-frame timestamp step.
    pub fps: u32,
    /// Maximum RTP packet size, header included.
    pub mtu: usize,
}

impl RtpConfig {
    /// RTP ticks per video frame.
    pub fn timestamp_step(&self) -> u32 {
        self.clock_rate / self.fps
    }
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            payload_type: 96,
            clock_rate: 90_000,
            fps: 30,
            mtu: 1200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let http_host = env_string("HTTP_HOST", "0.0.0.0");
        let http_port = env_u16("HTTP_PORT", 1988)?;
        let udp_host = env_string("UDP_HOST", "0.0.0.0");
        let udp_port = env_u16("UDP_PORT", 8554)?;

        let payload_type = env_u16("RTP_PAYLOAD_TYPE", 96)?;
        // Byte 1 of the RTP header packs the marker bit above the
        // payload type, so anything past 0x7f cannot be represented.
        if payload_type > 0x7f {
            bail!("RTP_PAYLOAD_TYPE must be <= 127, got {payload_type}");
        }

        let rtp = RtpConfig {
            payload_type: payload_type as u8,
            clock_rate: env_u32("RTP_CLOCK_RATE", 90_000)?,
            fps: env_u32("RTP_FPS", 30)?,
            mtu: env_u32("RTP_MTU", 1200)? as usize,
        };
        if rtp.fps == 0 {
            bail!("RTP_FPS must be non-zero");
        }
        if rtp.mtu <= 14 {
            bail!("RTP_MTU must exceed the RTP + FU-A overhead of 14 bytes");
        }

        let stun_servers = std::env::var("STUN_SERVERS")
            .map(|s| s.split(',').map(str::trim).map(String::from).collect())
            .unwrap_or_else(|_| vec!["stun:stun.l.google.com:19302".to_string()]);

        let turn_server = match std::env::var("TURN_URL") {
            Ok(url) => {
                let username = env_string("TURN_USERNAME", "");
                let credential = env_string("TURN_CREDENTIAL", "");
                if username.is_empty() || credential.is_empty() {
                    tracing::warn!("TURN_URL set without TURN_USERNAME/TURN_CREDENTIAL, ignoring");
                    None
                } else {
                    Some(TurnServer {
                        urls: vec![url],
                        username,
                        credential,
                    })
                }
            }
            Err(_) => None,
        };

        Ok(Config {
            http_host,
            http_port,
            udp_host,
            udp_port,
            rtp,
            stun_servers,
            turn_server,
        })
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.udp_host, self.udp_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 1988,
            udp_host: "0.0.0.0".to_string(),
            udp_port: 8554,
            rtp: RtpConfig::default(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_server: None,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u16(key: &str, default: u16) -> Result<u16> {
    match std::env::var(key) {
        Ok(v) => Ok(v.parse()?),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32> {
    match std::env::var(key) {
        Ok(v) => Ok(v.parse()?),
        Err(_) => Ok(default),
    }
}
