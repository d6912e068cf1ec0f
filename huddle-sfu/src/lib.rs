//! Huddle SFU session core
//!
//! Bookkeeping for a multi-party conferencing service built on a Selective
//! Forwarding Unit. The media engine itself sits behind [`MediaRouter`];
//! this crate tracks which room every peer belongs to and which
//! transports, producers and consumers it owns.
//!
//! ## Architecture
//!
//! - **`Registry`**: canonical, concurrently accessed room/peer/entity state
//! - **`SfuRoom`** / **`SfuPeer`**: per-room and per-peer ownership tables
//! - **`MediaRouter`**: adapter trait over the media engine
//! - **`LocalRouter`**: in-process `MediaRouter` implementation
//!
//! ## Invariants
//!
//! - Every transport, producer and consumer belongs to exactly one peer,
//!   and that peer to exactly one room
//! - A consumer only references an open producer
//! - No room exists without peers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use huddle_sfu::{LocalRouter, Registry, SfuConfig, SfuPeer};
//!
//! let config = SfuConfig::default();
//! let router = LocalRouter::new(config.clone());
//! let registry = Registry::new(&config);
//!
//! let outcome = registry.add_peer(&room_id, SfuPeer::new(peer_id, email, caps))?;
//! let transport = router.create_transport(TransportDirection::Send, &room_id).await?;
//! registry.attach_transport(&outcome.key, TransportRecord::new(transport.id, TransportDirection::Send))?;
//! ```

mod config;
mod error;
mod local_router;
mod peer;
mod registry;
mod room;
mod router;
mod rtp;
mod track;
mod transport;
mod types;

pub use config::SfuConfig;
pub use error::{RegistryError, RegistryResult, RouterError};
pub use local_router::LocalRouter;
pub use peer::{PeerInfo, ProducerInfo, SfuPeer};
pub use registry::{ChatStamp, ConsumeTarget, Departure, JoinOutcome, PeerKey, Registry, RegistryStats};
pub use room::{RoomStats, SfuRoom, Teardown};
pub use router::{ConsumerDescriptor, MediaRouter, RouterEntity, TransportDescriptor};
pub use rtp::{
    default_media_codecs, DtlsFingerprint, DtlsParameters, IceCandidate, IceParameters, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpParameters,
};
pub use track::{ConsumerRecord, ConsumerState, OrphanedConsumer, ProducerRecord};
pub use transport::{TransportRecord, TransportState};
pub use types::{ConsumerId, MediaKind, PeerId, ProducerId, RoomId, TransportDirection, TransportId};
