//! RTP capability and parameter descriptors exchanged with clients
//!
//! These mirror the JSON shapes browser SFU clients already speak
//! (camelCase, unknown fields tolerated), so client payloads can be
//! deserialized directly and handed to the media router.

use crate::types::MediaKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A codec the router (or a client) is able to handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub rtcp_feedback: Vec<Value>,
}

/// Capability descriptor: the router's supported codecs, or a client
/// device's receive capabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<Value>,
}

impl RtpCapabilities {
    /// Find a codec in these capabilities compatible with the given one
    #[must_use]
    pub fn find_compatible(&self, codec: &RtpCodecParameters) -> Option<&RtpCodecCapability> {
        self.codecs.iter().find(|cap| codec.is_compatible_with(cap))
    }
}

/// A concrete codec inside RTP send/receive parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub rtcp_feedback: Vec<Value>,
}

impl RtpCodecParameters {
    /// Same codec family: mime type, clock rate and (for audio) channel count
    #[must_use]
    pub fn is_compatible_with(&self, cap: &RtpCodecCapability) -> bool {
        if !self.mime_type.eq_ignore_ascii_case(&cap.mime_type) || self.clock_rate != cap.clock_rate {
            return false;
        }
        match (self.channels, cap.channels) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Media kind implied by the mime type prefix
    #[must_use]
    pub fn kind(&self) -> Option<MediaKind> {
        [MediaKind::Audio, MediaKind::Video]
            .into_iter()
            .find(|kind| kind.matches_mime(&self.mime_type))
    }
}

/// RTP parameters of a producer or consumer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default)]
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub header_extensions: Vec<Value>,
    #[serde(default)]
    pub encodings: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtcp: Option<Value>,
}

/// DTLS certificate fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

/// DTLS parameters of one transport endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// ICE credentials of a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    pub ice_lite: bool,
}

/// ICE host candidate announced for a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    pub protocol: String,
    #[serde(rename = "type")]
    pub candidate_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<String>,
}

/// Codecs the router supports: opus, VP8, VP9 (profile 2) and H264
#[must_use]
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    let video_feedback = || {
        vec![
            serde_json::json!({ "type": "nack" }),
            serde_json::json!({ "type": "nack", "parameter": "pli" }),
            serde_json::json!({ "type": "ccm", "parameter": "fir" }),
            serde_json::json!({ "type": "goog-remb" }),
            serde_json::json!({ "type": "transport-cc" }),
        ]
    };
    let params = |value: Value| match value {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    vec![
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            preferred_payload_type: Some(100),
            clock_rate: 48000,
            channels: Some(2),
            parameters: Map::new(),
            rtcp_feedback: vec![serde_json::json!({ "type": "transport-cc" })],
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            preferred_payload_type: Some(101),
            clock_rate: 90000,
            channels: None,
            parameters: params(serde_json::json!({ "x-google-start-bitrate": 1000 })),
            rtcp_feedback: video_feedback(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP9".to_string(),
            preferred_payload_type: Some(103),
            clock_rate: 90000,
            channels: None,
            parameters: params(serde_json::json!({
                "profile-id": 2,
                "x-google-start-bitrate": 1000
            })),
            rtcp_feedback: video_feedback(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/H264".to_string(),
            preferred_payload_type: Some(105),
            clock_rate: 90000,
            channels: None,
            parameters: params(serde_json::json!({
                "packetization-mode": 1,
                "profile-level-id": "4d0032",
                "level-asymmetry-allowed": 1,
                "x-google-start-bitrate": 1000
            })),
            rtcp_feedback: video_feedback(),
        },
    ]
}
