//! Signaling wire protocol
//!
//! JSON text frames over the WebSocket:
//!
//! - request: `{ "id": 7, "event": "produce", "data": { ... } }` (`id` is
//!   optional; requests without one get no reply, only an `error` push on
//!   failure)
//! - reply: `{ "id": 7, "ok": true, "data": { ... } }` or
//!   `{ "id": 7, "ok": false, "error": { "code": "...", "message": "..." } }`
//! - push: `{ "event": "new-producer", "data": { ... } }`

use huddle_sfu::{
    ConsumerId, DtlsParameters, MediaKind, PeerId, PeerInfo, ProducerId, RtpCapabilities, RtpParameters,
    TransportDirection, TransportId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request and push event names
pub mod events {
    pub const JOIN_ROOM: &str = "join-room";
    pub const CREATE_TRANSPORT: &str = "create-transport";
    pub const CONNECT_TRANSPORT: &str = "connect-transport";
    pub const PRODUCE: &str = "produce";
    pub const CONSUME: &str = "consume";
    pub const RESUME_CONSUMER: &str = "resume-consumer";
    pub const CLOSE_PRODUCER: &str = "close-producer";
    pub const LEAVE_ROOM: &str = "leave-room";
    pub const CHAT_MESSAGE: &str = "chat-message";

    pub const EXISTING_PEERS: &str = "existing-peers";
    pub const USER_JOINED: &str = "user-joined";
    pub const USER_LEFT: &str = "user-left";
    pub const NEW_PRODUCER: &str = "new-producer";
    pub const CONSUMER_CLOSED: &str = "consumer-closed";
    pub const ERROR: &str = "error";
}

/// Raw frame received from a client
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub id: Option<u64>,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ClientFrame {
    pub fn decode(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("malformed frame: {e}"))
    }
}

/// A decoded signaling request
#[derive(Debug, Clone)]
pub enum ClientRequest {
    JoinRoom(JoinRoomRequest),
    CreateTransport(CreateTransportRequest),
    ConnectTransport(ConnectTransportRequest),
    Produce(ProduceRequest),
    Consume(ConsumeRequest),
    ResumeConsumer(ResumeConsumerRequest),
    CloseProducer(CloseProducerRequest),
    ChatMessage(ChatMessageRequest),
    LeaveRoom,
}

impl ClientRequest {
    /// Decode the payload of a named request
    pub fn from_event(event: &str, data: Value) -> Result<Self, String> {
        fn payload<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T, String> {
            serde_json::from_value(data).map_err(|e| format!("invalid {event} payload: {e}"))
        }

        match event {
            events::JOIN_ROOM => payload(event, data).map(Self::JoinRoom),
            events::CREATE_TRANSPORT => payload(event, data).map(Self::CreateTransport),
            events::CONNECT_TRANSPORT => payload(event, data).map(Self::ConnectTransport),
            events::PRODUCE => payload(event, data).map(Self::Produce),
            events::CONSUME => payload(event, data).map(Self::Consume),
            events::RESUME_CONSUMER => payload(event, data).map(Self::ResumeConsumer),
            events::CLOSE_PRODUCER => payload(event, data).map(Self::CloseProducer),
            events::CHAT_MESSAGE => payload(event, data).map(Self::ChatMessage),
            events::LEAVE_ROOM => Ok(Self::LeaveRoom),
            other => Err(format!("unknown event '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_id: String,
    pub email: String,
    #[serde(default)]
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    pub peer_id: PeerId,
    pub room_id: String,
    pub existing_peers: Vec<PeerInfo>,
    pub router_rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportRequest {
    pub direction: TransportDirection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub transport_id: TransportId,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    #[serde(default)]
    pub app_data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProduceResponse {
    pub id: ProducerId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub producer_id: ProducerId,
    /// Falls back to the capabilities declared at join
    #[serde(default)]
    pub rtp_capabilities: Option<RtpCapabilities>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeConsumerRequest {
    pub consumer_id: ConsumerId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseProducerRequest {
    pub producer_id: ProducerId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRequest {
    pub room_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLeftEvent {
    pub id: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProducerEvent {
    pub producer_id: ProducerId,
    pub peer_id: PeerId,
    pub email: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerClosedEvent {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageEvent {
    pub email: String,
    pub message: String,
    /// RFC 3339 with microseconds, strictly increasing per room
    pub timestamp: String,
}

/// Error body of a failed reply or an `error` push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    /// Request the error belongs to, on pushes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

/// Frame sent to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Reply {
        id: u64,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    Push {
        event: String,
        data: Value,
    },
}

impl ServerMessage {
    pub fn success(id: u64, data: impl Serialize) -> Self {
        Self::Reply {
            id,
            ok: true,
            data: Some(serde_json::to_value(data).unwrap_or_default()),
            error: None,
        }
    }

    #[must_use]
    pub const fn failure(id: u64, error: ErrorBody) -> Self {
        Self::Reply {
            id,
            ok: false,
            data: None,
            error: Some(error),
        }
    }

    pub fn push(event: &str, data: impl Serialize) -> Self {
        Self::Push {
            event: event.to_string(),
            data: serde_json::to_value(data).unwrap_or_default(),
        }
    }

    /// Event name of a push, `None` for replies
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        match self {
            Self::Push { event, .. } => Some(event),
            Self::Reply { .. } => None,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        serde_json::to_string(self).map_err(|e| format!("failed to encode server message: {e}"))
    }
}
