//! SFU Configuration

use crate::rtp::{default_media_codecs, RtpCodecCapability};
use serde::{Deserialize, Serialize};

/// SFU configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SfuConfig {
    /// Maximum number of concurrent rooms (0 = unlimited)
    pub max_rooms: usize,
    /// Maximum peers per room (0 = unlimited)
    pub max_peers_per_room: usize,
    /// Address transports bind to
    pub listen_ip: String,
    /// Address advertised in ICE candidates (falls back to `listen_ip`)
    pub announced_ip: Option<String>,
    /// Lowest RTC port handed to transports
    pub rtc_min_port: u16,
    /// Highest RTC port handed to transports
    pub rtc_max_port: u16,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    /// Give UDP candidates a higher ICE priority than TCP ones
    pub prefer_udp: bool,
    /// Codecs the router accepts and offers
    pub media_codecs: Vec<RtpCodecCapability>,
}

impl SfuConfig {
    /// IP placed into ICE candidates
    #[must_use]
    pub fn candidate_ip(&self) -> &str {
        self.announced_ip
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .unwrap_or(&self.listen_ip)
    }
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            max_rooms: 0,
            max_peers_per_room: 50,
            listen_ip: "0.0.0.0".to_string(),
            announced_ip: Some("127.0.0.1".to_string()),
            rtc_min_port: 10000,
            rtc_max_port: 10100,
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            media_codecs: default_media_codecs(),
        }
    }
}
