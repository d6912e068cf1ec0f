//! Entity registry - canonical session state
//!
//! Rooms live in a `DashMap`; every mutation happens under the owning
//! room's entry guard, so two requests touching the same room serialize
//! while different rooms proceed independently. Id indexes map every
//! peer, transport, producer and consumer to its owner for ownership
//! checks and O(1) lookup.
//!
//! Lock order is always room first, index second. Index lookups copy the
//! owner key out before any room is locked. All operations are
//! synchronous, so no guard can be held across a media router call.

use crate::config::SfuConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::peer::{PeerInfo, SfuPeer};
use crate::room::{RoomStats, SfuRoom, Teardown};
use crate::rtp::RtpCapabilities;
use crate::track::{ConsumerRecord, ConsumerState, OrphanedConsumer, ProducerRecord};
use crate::transport::{TransportRecord, TransportState};
use crate::types::{ConsumerId, MediaKind, PeerId, ProducerId, RoomId, TransportDirection, TransportId};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Address of a joined peer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerKey {
    pub room_id: RoomId,
    pub peer_id: PeerId,
}

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub key: PeerKey,
    /// Peers already in the room when the caller joined
    pub existing: Vec<PeerInfo>,
    pub room_created: bool,
}

/// Result of removing a peer
#[derive(Debug, Clone)]
pub struct Departure {
    pub peer: PeerInfo,
    pub teardown: Teardown,
    /// Peers still in the room
    pub remaining: Vec<PeerId>,
    pub room_closed: bool,
}

/// What a consume call needs from the registry
#[derive(Debug, Clone)]
pub struct ConsumeTarget {
    pub transport_id: TransportId,
    pub producer_peer: PeerId,
    pub kind: MediaKind,
    /// Capabilities the caller declared at join
    pub rtp_capabilities: RtpCapabilities,
}

/// A chat message stamped with the room's server clock
#[derive(Debug, Clone)]
pub struct ChatStamp {
    pub timestamp: DateTime<Utc>,
    pub email: String,
    /// Every peer in the room, sender included
    pub audience: Vec<PeerId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub rooms: usize,
    pub peers: usize,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

/// Entity registry
pub struct Registry {
    max_rooms: usize,
    max_peers_per_room: usize,

    rooms: DashMap<RoomId, SfuRoom>,

    peers: DashMap<PeerId, RoomId>,
    transports: DashMap<TransportId, PeerKey>,
    producers: DashMap<ProducerId, PeerKey>,
    consumers: DashMap<ConsumerId, PeerKey>,

    /// Rooms alive or reserved, tracked apart from `rooms.len()` which
    /// must not be called under a room guard
    room_slots: AtomicUsize,
}

impl Registry {
    #[must_use]
    pub fn new(config: &SfuConfig) -> Self {
        info!(
            max_rooms = config.max_rooms,
            max_peers_per_room = config.max_peers_per_room,
            "Entity registry initialized"
        );

        Self {
            max_rooms: config.max_rooms,
            max_peers_per_room: config.max_peers_per_room,
            rooms: DashMap::new(),
            peers: DashMap::new(),
            transports: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            room_slots: AtomicUsize::new(0),
        }
    }

    /// Add a peer to a room, creating the room if this is its first peer
    pub fn add_peer(&self, room_id: &RoomId, peer: SfuPeer) -> RegistryResult<JoinOutcome> {
        let peer_id = peer.id.clone();
        if self.peers.contains_key(&peer_id) {
            return Err(RegistryError::Conflict(format!("peer {peer_id} already joined a room")));
        }

        let (existing, room_created) = match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(mut entry) => {
                let room = entry.get_mut();
                if room.peers.contains_key(&peer_id) {
                    return Err(RegistryError::Conflict(format!(
                        "peer {peer_id} already in room {room_id}"
                    )));
                }
                if self.max_peers_per_room > 0 && room.peer_count() >= self.max_peers_per_room {
                    warn!(
                        room_id = %room_id,
                        max_peers = self.max_peers_per_room,
                        "Peer limit reached for room"
                    );
                    return Err(RegistryError::Limit(format!("room {room_id} is full")));
                }

                let existing = room.peer_infos(None);
                room.peers.insert(peer_id.clone(), peer);
                self.peers.insert(peer_id.clone(), room_id.clone());
                (existing, false)
            }
            Entry::Vacant(entry) => {
                if !self.reserve_room_slot() {
                    warn!(max_rooms = self.max_rooms, "Room limit reached");
                    return Err(RegistryError::Limit("maximum number of rooms reached".to_string()));
                }
                entry.insert(SfuRoom::with_peer(room_id.clone(), peer));
                self.peers.insert(peer_id.clone(), room_id.clone());
                (Vec::new(), true)
            }
        };

        if room_created {
            info!(room_id = %room_id, peer_id = %peer_id, "Created room");
        }
        info!(
            room_id = %room_id,
            peer_id = %peer_id,
            peer_count = existing.len() + 1,
            "Added peer to room"
        );

        Ok(JoinOutcome {
            key: PeerKey {
                room_id: room_id.clone(),
                peer_id,
            },
            existing,
            room_created,
        })
    }

    /// Remove a peer and everything it owns; delete the room if it is
    /// now empty
    pub fn remove_peer(&self, key: &PeerKey) -> RegistryResult<Departure> {
        let Entry::Occupied(mut entry) = self.rooms.entry(key.room_id.clone()) else {
            return Err(RegistryError::not_found("room", &key.room_id));
        };

        let (peer, teardown) = entry
            .get_mut()
            .remove_peer(&key.peer_id)
            .ok_or_else(|| RegistryError::not_found("peer", &key.peer_id))?;
        self.peers.remove(&key.peer_id);
        self.forget(&teardown);

        let remaining = entry.get().peer_ids(None);
        let room_closed = remaining.is_empty();
        if room_closed {
            entry.remove();
            self.room_slots.fetch_sub(1, Ordering::SeqCst);
        }

        info!(
            room_id = %key.room_id,
            peer_id = %key.peer_id,
            transports = teardown.transports.len(),
            producers = teardown.producers.len(),
            consumers = teardown.consumers.len(),
            orphaned = teardown.orphaned.len(),
            room_closed,
            "Removed peer from room"
        );

        Ok(Departure {
            peer: peer.info(),
            teardown,
            remaining,
            room_closed,
        })
    }

    /// Store a new transport. A transport already occupying the same
    /// direction is closed and returned for router cleanup.
    pub fn attach_transport(&self, key: &PeerKey, record: TransportRecord) -> RegistryResult<Option<Teardown>> {
        let mut room = self.room_mut(key)?;
        let transport_id = record.id.clone();
        let direction = record.direction;

        let stale = Self::peer_mut(&mut room, key)?.set_transport(record);
        let teardown = stale.and_then(|old| room.remove_transport(&key.peer_id, &old));

        self.transports.insert(transport_id.clone(), key.clone());
        if let Some(teardown) = &teardown {
            self.forget(teardown);
            info!(
                peer_id = %key.peer_id,
                %direction,
                replaced = ?teardown.transports,
                "Replaced stale transport"
            );
        }

        debug!(peer_id = %key.peer_id, transport_id = %transport_id, %direction, "Attached transport");
        Ok(teardown)
    }

    /// Lookup of one of the caller's transports
    pub fn get_transport(&self, key: &PeerKey, transport_id: &TransportId) -> RegistryResult<TransportRecord> {
        Self::check_owner(&self.transports, key, transport_id, "transport")?;
        let room = self.room(key)?;
        Self::peer(&room, key)?
            .transport(transport_id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found("transport", transport_id))
    }

    /// Move a transport `new → connecting` before the router is asked to
    /// connect it
    pub fn begin_connect(&self, key: &PeerKey, transport_id: &TransportId) -> RegistryResult<()> {
        self.transition_transport(key, transport_id, TransportState::Connecting)
    }

    /// Record the router's answer: `connecting → connected` or `→ failed`
    pub fn finish_connect(&self, key: &PeerKey, transport_id: &TransportId, connected: bool) -> RegistryResult<()> {
        let next = if connected {
            TransportState::Connected
        } else {
            TransportState::Failed
        };
        self.transition_transport(key, transport_id, next)
    }

    /// The transport must be the caller's, connected, and of direction send
    pub fn check_producible(&self, key: &PeerKey, transport_id: &TransportId) -> RegistryResult<()> {
        let transport = self.get_transport(key, transport_id)?;
        Self::ensure_usable(&transport, TransportDirection::Send)
    }

    /// Register a producer. Returns the other peers of the room, computed
    /// atomically with the insert so each of them learns about it exactly
    /// once (either here or in a later join snapshot).
    pub fn attach_producer(&self, key: &PeerKey, record: ProducerRecord) -> RegistryResult<Vec<PeerId>> {
        let mut room = self.room_mut(key)?;
        let producer_id = record.id.clone();
        {
            let peer = Self::peer_mut(&mut room, key)?;
            let transport = peer
                .transport(&record.transport_id)
                .ok_or_else(|| RegistryError::not_found("transport", &record.transport_id))?;
            Self::ensure_usable(transport, TransportDirection::Send)?;
            peer.producers.insert(producer_id.clone(), record);
        }
        self.producers.insert(producer_id.clone(), key.clone());

        debug!(peer_id = %key.peer_id, producer_id = %producer_id, "Attached producer");
        Ok(room.peer_ids(Some(&key.peer_id)))
    }

    /// Resolve what the caller needs to consume `producer_id`
    pub fn consume_target(&self, key: &PeerKey, producer_id: &ProducerId) -> RegistryResult<ConsumeTarget> {
        let owner = self
            .producers
            .get(producer_id)
            .map(|owner| owner.value().clone())
            .filter(|owner| owner.room_id == key.room_id)
            .ok_or_else(|| RegistryError::not_found("producer", producer_id))?;

        let room = self.room(key)?;
        let peer = Self::peer(&room, key)?;
        let transport = peer
            .transport_for(TransportDirection::Recv)
            .ok_or_else(|| RegistryError::Conflict("no recv transport".to_string()))?;
        Self::ensure_usable(transport, TransportDirection::Recv)?;

        let producer = room
            .peer(&owner.peer_id)
            .and_then(|p| p.producer(producer_id))
            .ok_or_else(|| RegistryError::not_found("producer", producer_id))?;

        Ok(ConsumeTarget {
            transport_id: transport.id.clone(),
            producer_peer: owner.peer_id,
            kind: producer.kind,
            rtp_capabilities: peer.rtp_capabilities.clone(),
        })
    }

    /// Register a consumer, re-checking that its producer is still open
    pub fn attach_consumer(&self, key: &PeerKey, record: ConsumerRecord) -> RegistryResult<()> {
        let mut room = self.room_mut(key)?;
        let producer_open = room
            .peer(&record.producer_peer)
            .is_some_and(|p| p.producer(&record.producer_id).is_some());
        if !producer_open {
            return Err(RegistryError::not_found("producer", &record.producer_id));
        }

        let consumer_id = record.id.clone();
        {
            let peer = Self::peer_mut(&mut room, key)?;
            if peer.transport(&record.transport_id).is_none() {
                return Err(RegistryError::not_found("transport", &record.transport_id));
            }
            peer.consumers.insert(consumer_id.clone(), record);
        }
        self.consumers.insert(consumer_id.clone(), key.clone());

        debug!(peer_id = %key.peer_id, consumer_id = %consumer_id, "Attached consumer");
        Ok(())
    }

    /// Lookup of one of the caller's consumers
    pub fn get_consumer(&self, key: &PeerKey, consumer_id: &ConsumerId) -> RegistryResult<ConsumerRecord> {
        Self::check_owner(&self.consumers, key, consumer_id, "consumer")?;
        let room = self.room(key)?;
        Self::peer(&room, key)?
            .consumer(consumer_id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found("consumer", consumer_id))
    }

    /// `paused → resumed`; resuming twice is harmless
    pub fn mark_consumer_resumed(&self, key: &PeerKey, consumer_id: &ConsumerId) -> RegistryResult<()> {
        Self::check_owner(&self.consumers, key, consumer_id, "consumer")?;
        let mut room = self.room_mut(key)?;
        let consumer = Self::peer_mut(&mut room, key)?
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| RegistryError::not_found("consumer", consumer_id))?;
        consumer.state = ConsumerState::Resumed;
        Ok(())
    }

    /// Close one of the caller's producers and every consumer of it
    pub fn close_producer(&self, key: &PeerKey, producer_id: &ProducerId) -> RegistryResult<Teardown> {
        Self::check_owner(&self.producers, key, producer_id, "producer")?;
        let mut room = self.room_mut(key)?;
        let teardown = room
            .remove_producer(&key.peer_id, producer_id)
            .ok_or_else(|| RegistryError::not_found("producer", producer_id))?;
        self.forget(&teardown);

        debug!(
            peer_id = %key.peer_id,
            producer_id = %producer_id,
            orphaned = teardown.orphaned.len(),
            "Closed producer"
        );
        Ok(teardown)
    }

    /// Detach every consumer referencing a producer, wherever it lives.
    /// Used when the producer went away outside a registry cascade.
    pub fn detach_consumers_of_producer(&self, producer_id: &ProducerId) -> RegistryResult<Vec<OrphanedConsumer>> {
        let owner = self
            .producers
            .get(producer_id)
            .map(|owner| owner.value().clone())
            .ok_or_else(|| RegistryError::not_found("producer", producer_id))?;

        let mut room = self
            .rooms
            .get_mut(&owner.room_id)
            .ok_or_else(|| RegistryError::not_found("room", &owner.room_id))?;
        let orphaned = room.detach_consumers_of_producer(producer_id);
        for consumer in &orphaned {
            self.consumers.remove(&consumer.consumer_id);
        }
        Ok(orphaned)
    }

    /// Stamp a chat message and hand it to `deliver` while the room is
    /// still locked, so every member sees the room's messages in timestamp
    /// order
    pub fn stamp_chat<R>(&self, key: &PeerKey, deliver: impl FnOnce(&ChatStamp) -> R) -> RegistryResult<R> {
        let mut room = self.room_mut(key)?;
        let email = Self::peer(&room, key)?.email.clone();
        let stamp = ChatStamp {
            timestamp: room.next_chat_timestamp(),
            email,
            audience: room.peer_ids(None),
        };
        Ok(deliver(&stamp))
    }

    /// Public view of a joined peer
    pub fn get_peer(&self, peer_id: &PeerId) -> RegistryResult<PeerInfo> {
        let room_id = self
            .peers
            .get(peer_id)
            .map(|room| room.value().clone())
            .ok_or_else(|| RegistryError::not_found("peer", peer_id))?;
        self.rooms
            .get(&room_id)
            .and_then(|room| room.peer(peer_id).map(SfuPeer::info))
            .ok_or_else(|| RegistryError::not_found("peer", peer_id))
    }

    #[must_use]
    pub fn has_room(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    #[must_use]
    pub fn has_peer(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Peer count of a room, `None` when the room does not exist
    #[must_use]
    pub fn peer_count(&self, room_id: &RoomId) -> Option<usize> {
        self.rooms.get(room_id).map(|room| room.peer_count())
    }

    #[must_use]
    pub fn room_stats(&self, room_id: &RoomId) -> Option<RoomStats> {
        self.rooms.get(room_id).map(|room| room.stats())
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            rooms: self.rooms.len(),
            peers: self.peers.len(),
            transports: self.transports.len(),
            producers: self.producers.len(),
            consumers: self.consumers.len(),
        }
    }

    fn reserve_room_slot(&self) -> bool {
        if self.max_rooms == 0 {
            self.room_slots.fetch_add(1, Ordering::SeqCst);
            return true;
        }
        self.room_slots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.max_rooms).then_some(n + 1))
            .is_ok()
    }

    fn transition_transport(
        &self,
        key: &PeerKey,
        transport_id: &TransportId,
        next: TransportState,
    ) -> RegistryResult<()> {
        Self::check_owner(&self.transports, key, transport_id, "transport")?;
        let mut room = self.room_mut(key)?;
        let transport = Self::peer_mut(&mut room, key)?
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| RegistryError::not_found("transport", transport_id))?;

        if !transport.state.can_transition_to(next) {
            return Err(RegistryError::Conflict(format!(
                "transport {transport_id} is {}, cannot become {next}",
                transport.state
            )));
        }
        debug!(transport_id = %transport_id, from = %transport.state, to = %next, "Transport state changed");
        transport.state = next;
        Ok(())
    }

    fn ensure_usable(transport: &TransportRecord, direction: TransportDirection) -> RegistryResult<()> {
        if transport.direction != direction {
            return Err(RegistryError::Conflict(format!(
                "transport {} is not a {direction} transport",
                transport.id
            )));
        }
        if !transport.is_connected() {
            return Err(RegistryError::Conflict(format!(
                "transport {} is {}",
                transport.id, transport.state
            )));
        }
        Ok(())
    }

    /// Drop index entries for everything in a teardown
    fn forget(&self, teardown: &Teardown) {
        for id in &teardown.transports {
            self.transports.remove(id);
        }
        for id in &teardown.producers {
            self.producers.remove(id);
        }
        for id in &teardown.consumers {
            self.consumers.remove(id);
        }
        for orphan in &teardown.orphaned {
            self.consumers.remove(&orphan.consumer_id);
        }
    }

    fn check_owner<K>(index: &DashMap<K, PeerKey>, key: &PeerKey, id: &K, entity: &'static str) -> RegistryResult<()>
    where
        K: Eq + Hash + fmt::Display,
    {
        let owner = index.get(id).map(|owner| owner.value().clone());
        match owner {
            Some(owner) if owner == *key => Ok(()),
            Some(owner) => {
                warn!(
                    entity,
                    id = %id,
                    caller = %key.peer_id,
                    owner = %owner.peer_id,
                    "Rejected access to entity owned by another peer"
                );
                Err(RegistryError::Forbidden {
                    entity,
                    id: id.to_string(),
                })
            }
            None => Err(RegistryError::not_found(entity, id)),
        }
    }

    fn room(&self, key: &PeerKey) -> RegistryResult<Ref<'_, RoomId, SfuRoom>> {
        self.rooms
            .get(&key.room_id)
            .ok_or_else(|| RegistryError::not_found("peer", &key.peer_id))
    }

    fn room_mut(&self, key: &PeerKey) -> RegistryResult<RefMut<'_, RoomId, SfuRoom>> {
        self.rooms
            .get_mut(&key.room_id)
            .ok_or_else(|| RegistryError::not_found("peer", &key.peer_id))
    }

    fn peer<'a>(room: &'a SfuRoom, key: &PeerKey) -> RegistryResult<&'a SfuPeer> {
        room.peer(&key.peer_id)
            .ok_or_else(|| RegistryError::not_found("peer", &key.peer_id))
    }

    fn peer_mut<'a>(room: &'a mut SfuRoom, key: &PeerKey) -> RegistryResult<&'a mut SfuPeer> {
        room.peers
            .get_mut(&key.peer_id)
            .ok_or_else(|| RegistryError::not_found("peer", &key.peer_id))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(&SfuConfig::default())
    }
}
