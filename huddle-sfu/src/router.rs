//! Media router adapter
//!
//! The router performs the actual RTP forwarding, ICE and DTLS. The rest
//! of the crate only ever talks to it through [`MediaRouter`], so the
//! signaling core stays independent of whichever engine sits behind it.
//!
//! Every async method is a suspension point: callers must not hold
//! registry locks across them.

use crate::error::RouterError;
use crate::rtp::{DtlsParameters, IceCandidate, IceParameters, RtpCapabilities, RtpParameters};
use crate::types::{ConsumerId, MediaKind, ProducerId, RoomId, TransportDirection, TransportId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Everything a client needs to set up its side of a transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportDescriptor {
    pub id: TransportId,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// Everything a client needs to receive a consumer's stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerDescriptor {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// Router-side entity to release
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouterEntity {
    Transport(TransportId),
    Producer(ProducerId),
    Consumer(ConsumerId),
}

/// Media router adapter
#[async_trait]
pub trait MediaRouter: Send + Sync {
    /// Codecs and header extensions the router supports
    fn capabilities(&self) -> RtpCapabilities;

    /// Allocate a transport for a peer of `room_id`
    async fn create_transport(
        &self,
        direction: TransportDirection,
        room_id: &RoomId,
    ) -> Result<TransportDescriptor, RouterError>;

    /// Complete the DTLS handshake parameters of a transport
    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), RouterError>;

    /// Start receiving a stream on a send transport
    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
        app_data: &serde_json::Value,
    ) -> Result<ProducerId, RouterError>;

    /// Whether a device with `rtp_capabilities` can receive the producer
    async fn can_consume(&self, producer_id: &ProducerId, rtp_capabilities: &RtpCapabilities) -> bool;

    /// Create a paused consumer of `producer_id` on a recv transport
    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerDescriptor, RouterError>;

    /// Start media flow on a paused consumer
    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<(), RouterError>;

    /// Release an entity. Fire-and-forget; unknown ids are ignored.
    fn close(&self, entity: RouterEntity);

    /// A closed router can no longer serve any request
    fn is_closed(&self) -> bool;
}
