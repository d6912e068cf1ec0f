//! SFU Peer state
//!
//! A peer is one signaling connection that joined a room. It exclusively
//! owns its transports, producers and consumers; the room owns the peer.

use crate::rtp::RtpCapabilities;
use crate::track::{ConsumerRecord, ProducerRecord};
use crate::transport::TransportRecord;
use crate::types::{ConsumerId, MediaKind, PeerId, ProducerId, TransportDirection, TransportId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A producer as announced to other peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub producer_id: ProducerId,
    pub kind: MediaKind,
}

/// Public view of a peer, as sent in `existing-peers` and `user-joined`.
/// Late joiners learn about already published streams from `producers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub producers: Vec<ProducerInfo>,
}

/// SFU Peer - one participant in a room
#[derive(Debug, Clone)]
pub struct SfuPeer {
    pub id: PeerId,
    pub email: String,
    /// Receive capabilities of the peer's device
    pub rtp_capabilities: RtpCapabilities,
    pub joined_at: DateTime<Utc>,

    send_transport: Option<TransportId>,
    recv_transport: Option<TransportId>,

    pub(crate) transports: HashMap<TransportId, TransportRecord>,
    pub(crate) producers: HashMap<ProducerId, ProducerRecord>,
    pub(crate) consumers: HashMap<ConsumerId, ConsumerRecord>,
}

impl SfuPeer {
    #[must_use]
    pub fn new(id: PeerId, email: impl Into<String>, rtp_capabilities: RtpCapabilities) -> Self {
        Self {
            id,
            email: email.into(),
            rtp_capabilities,
            joined_at: Utc::now(),
            send_transport: None,
            recv_transport: None,
            transports: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id.clone(),
            email: self.email.clone(),
            producers: self
                .producers
                .values()
                .map(|p| ProducerInfo {
                    producer_id: p.id.clone(),
                    kind: p.kind,
                })
                .collect(),
        }
    }

    /// Current transport for a direction
    #[must_use]
    pub fn transport_for(&self, direction: TransportDirection) -> Option<&TransportRecord> {
        let id = match direction {
            TransportDirection::Send => self.send_transport.as_ref(),
            TransportDirection::Recv => self.recv_transport.as_ref(),
        }?;
        self.transports.get(id)
    }

    #[must_use]
    pub fn transport(&self, id: &TransportId) -> Option<&TransportRecord> {
        self.transports.get(id)
    }

    #[must_use]
    pub fn producer(&self, id: &ProducerId) -> Option<&ProducerRecord> {
        self.producers.get(id)
    }

    #[must_use]
    pub fn consumer(&self, id: &ConsumerId) -> Option<&ConsumerRecord> {
        self.consumers.get(id)
    }

    #[must_use]
    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Install a transport in its direction slot, returning the id of the
    /// transport it displaced
    pub(crate) fn set_transport(&mut self, record: TransportRecord) -> Option<TransportId> {
        let slot = match record.direction {
            TransportDirection::Send => &mut self.send_transport,
            TransportDirection::Recv => &mut self.recv_transport,
        };
        let stale = slot.replace(record.id.clone());
        self.transports.insert(record.id.clone(), record);
        stale
    }

    /// Remove a transport together with every producer and consumer that
    /// runs over it
    pub(crate) fn take_transport(
        &mut self,
        id: &TransportId,
    ) -> Option<(TransportRecord, Vec<ProducerId>, Vec<ConsumerId>)> {
        let record = self.transports.remove(id)?;
        if self.send_transport.as_ref() == Some(id) {
            self.send_transport = None;
        }
        if self.recv_transport.as_ref() == Some(id) {
            self.recv_transport = None;
        }

        let producers: Vec<ProducerId> = self
            .producers
            .values()
            .filter(|p| &p.transport_id == id)
            .map(|p| p.id.clone())
            .collect();
        for producer_id in &producers {
            self.producers.remove(producer_id);
        }

        let consumers: Vec<ConsumerId> = self
            .consumers
            .values()
            .filter(|c| &c.transport_id == id)
            .map(|c| c.id.clone())
            .collect();
        for consumer_id in &consumers {
            self.consumers.remove(consumer_id);
        }

        Some((record, producers, consumers))
    }
}
