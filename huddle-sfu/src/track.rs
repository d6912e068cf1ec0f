//! Producer and consumer records

use crate::types::{ConsumerId, MediaKind, PeerId, ProducerId, TransportId};
use serde::{Deserialize, Serialize};

/// A published stream on one of the owning peer's send transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub id: ProducerId,
    pub kind: MediaKind,
    pub transport_id: TransportId,
}

/// Consumer lifecycle. Closed consumers are dropped from the registry, so
/// only the live states are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    Paused,
    Resumed,
}

/// A subscription to a producer, received on the owning peer's recv
/// transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    pub id: ConsumerId,
    pub kind: MediaKind,
    /// Non-owning reference, valid only while the producer is open
    pub producer_id: ProducerId,
    /// Peer that owns `producer_id`
    pub producer_peer: PeerId,
    pub transport_id: TransportId,
    pub state: ConsumerState,
}

impl ConsumerRecord {
    /// New consumers always start paused
    #[must_use]
    pub fn paused(
        id: ConsumerId,
        kind: MediaKind,
        producer_id: ProducerId,
        producer_peer: PeerId,
        transport_id: TransportId,
    ) -> Self {
        Self {
            id,
            kind,
            producer_id,
            producer_peer,
            transport_id,
            state: ConsumerState::Paused,
        }
    }
}

/// A consumer closed because the producer it referenced went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedConsumer {
    /// Peer that owned the consumer and should hear `consumer-closed`
    pub peer_id: PeerId,
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
}
