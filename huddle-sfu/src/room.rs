//! SFU Room state and the close cascade

use crate::peer::{PeerInfo, SfuPeer};
use crate::router::RouterEntity;
use crate::track::OrphanedConsumer;
use crate::types::{ConsumerId, PeerId, ProducerId, RoomId, TransportId};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything removed by one close cascade
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Teardown {
    pub transports: Vec<TransportId>,
    pub producers: Vec<ProducerId>,
    /// Consumers owned by the peer the cascade started from
    pub consumers: Vec<ConsumerId>,
    /// Consumers of other peers whose producer went away
    pub orphaned: Vec<OrphanedConsumer>,
}

impl Teardown {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
            && self.producers.is_empty()
            && self.consumers.is_empty()
            && self.orphaned.is_empty()
    }

    /// Router entities to release, consumers first
    #[must_use]
    pub fn router_entities(&self) -> Vec<RouterEntity> {
        self.consumers
            .iter()
            .cloned()
            .chain(self.orphaned.iter().map(|o| o.consumer_id.clone()))
            .map(RouterEntity::Consumer)
            .chain(self.producers.iter().cloned().map(RouterEntity::Producer))
            .chain(self.transports.iter().cloned().map(RouterEntity::Transport))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomStats {
    pub peer_count: usize,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

/// SFU Room - the peers that joined under one room id
#[derive(Debug)]
pub struct SfuRoom {
    pub id: RoomId,
    pub created_at: DateTime<Utc>,
    pub(crate) peers: HashMap<PeerId, SfuPeer>,
    last_chat_at: Option<DateTime<Utc>>,
}

impl SfuRoom {
    /// Rooms are never created empty
    pub(crate) fn with_peer(id: RoomId, peer: SfuPeer) -> Self {
        let mut peers = HashMap::new();
        peers.insert(peer.id.clone(), peer);
        Self {
            id,
            created_at: Utc::now(),
            peers,
            last_chat_at: None,
        }
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    #[must_use]
    pub fn peer(&self, peer_id: &PeerId) -> Option<&SfuPeer> {
        self.peers.get(peer_id)
    }

    /// Peers other than `except`
    #[must_use]
    pub fn peer_infos(&self, except: Option<&PeerId>) -> Vec<PeerInfo> {
        self.peers
            .values()
            .filter(|p| Some(&p.id) != except)
            .map(SfuPeer::info)
            .collect()
    }

    #[must_use]
    pub fn peer_ids(&self, except: Option<&PeerId>) -> Vec<PeerId> {
        self.peers
            .keys()
            .filter(|id| Some(*id) != except)
            .cloned()
            .collect()
    }

    /// Close every consumer in the room that references `producer_id`
    pub fn detach_consumers_of_producer(&mut self, producer_id: &ProducerId) -> Vec<OrphanedConsumer> {
        let mut orphaned = Vec::new();
        for peer in self.peers.values_mut() {
            let owner = peer.id.clone();
            peer.consumers.retain(|consumer_id, consumer| {
                if &consumer.producer_id == producer_id {
                    orphaned.push(OrphanedConsumer {
                        peer_id: owner.clone(),
                        consumer_id: consumer_id.clone(),
                        producer_id: producer_id.clone(),
                    });
                    false
                } else {
                    true
                }
            });
        }
        orphaned
    }

    /// Remove a peer and everything it owns. Consumers other peers hold on
    /// its producers are detached as well.
    pub(crate) fn remove_peer(&mut self, peer_id: &PeerId) -> Option<(SfuPeer, Teardown)> {
        let mut peer = self.peers.remove(peer_id)?;

        let mut teardown = Teardown {
            transports: peer.transports.keys().cloned().collect(),
            producers: peer.producers.keys().cloned().collect(),
            consumers: peer.consumers.keys().cloned().collect(),
            orphaned: Vec::new(),
        };
        for producer_id in &teardown.producers {
            let orphaned = self.detach_consumers_of_producer(producer_id);
            teardown.orphaned.extend(orphaned);
        }

        peer.transports.clear();
        peer.producers.clear();
        peer.consumers.clear();
        Some((peer, teardown))
    }

    /// Remove one of a peer's transports, cascading to what runs over it
    pub(crate) fn remove_transport(&mut self, peer_id: &PeerId, transport_id: &TransportId) -> Option<Teardown> {
        let (_, producers, consumers) = self.peers.get_mut(peer_id)?.take_transport(transport_id)?;

        let mut teardown = Teardown {
            transports: vec![transport_id.clone()],
            producers: Vec::new(),
            consumers,
            orphaned: Vec::new(),
        };
        for producer_id in producers {
            teardown.orphaned.extend(self.detach_consumers_of_producer(&producer_id));
            teardown.producers.push(producer_id);
        }
        Some(teardown)
    }

    /// Remove one of a peer's producers and its consumers
    pub(crate) fn remove_producer(&mut self, peer_id: &PeerId, producer_id: &ProducerId) -> Option<Teardown> {
        self.peers.get_mut(peer_id)?.producers.remove(producer_id)?;

        Some(Teardown {
            producers: vec![producer_id.clone()],
            orphaned: self.detach_consumers_of_producer(producer_id),
            ..Teardown::default()
        })
    }

    /// Server timestamp for the next chat message, strictly after the
    /// previous one
    pub(crate) fn next_chat_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_chat_at {
            Some(last) if now <= last => last + TimeDelta::microseconds(1),
            _ => now,
        };
        self.last_chat_at = Some(stamp);
        stamp
    }

    #[must_use]
    pub fn stats(&self) -> RoomStats {
        self.peers.values().fold(
            RoomStats {
                peer_count: self.peers.len(),
                ..RoomStats::default()
            },
            |mut stats, peer| {
                stats.transports += peer.transport_count();
                stats.producers += peer.producer_count();
                stats.consumers += peer.consumer_count();
                stats
            },
        )
    }
}
