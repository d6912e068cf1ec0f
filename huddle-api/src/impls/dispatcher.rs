//! Notification dispatcher
//!
//! The only place pushes leave the process. Each connection registers a
//! sender under its peer id; delivery is fire-and-forget per recipient, so a
//! closing or slow connection never blocks the others.

use crate::proto::ServerMessage;
use dashmap::DashMap;
use huddle_sfu::PeerId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Trait for sending server messages to one client connection
pub trait MessageSender: Send + Sync {
    /// Queue a message without waiting
    fn send(&self, message: ServerMessage) -> Result<(), String>;
}

/// `MessageSender` over a bounded channel drained by the connection's
/// writer task
#[derive(Clone)]
pub struct ChannelSender {
    sender: mpsc::Sender<ServerMessage>,
}

impl ChannelSender {
    #[must_use]
    pub const fn new(sender: mpsc::Sender<ServerMessage>) -> Self {
        Self { sender }
    }
}

impl MessageSender for ChannelSender {
    fn send(&self, message: ServerMessage) -> Result<(), String> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => "Channel full: client too slow to consume messages".to_string(),
            mpsc::error::TrySendError::Closed(_) => "Channel closed: client disconnected".to_string(),
        })
    }
}

/// Routes messages to connected peers
#[derive(Default)]
pub struct Dispatcher {
    connections: DashMap<PeerId, Arc<dyn MessageSender>>,
    dropped: AtomicU64,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer_id: PeerId, sender: Arc<dyn MessageSender>) {
        debug!(peer_id = %peer_id, "Registered connection");
        self.connections.insert(peer_id, sender);
    }

    pub fn unregister(&self, peer_id: &PeerId) {
        if self.connections.remove(peer_id).is_some() {
            debug!(peer_id = %peer_id, "Unregistered connection");
        }
    }

    /// Deliver to one peer. Returns whether the message was queued.
    pub fn send_to(&self, peer_id: &PeerId, message: ServerMessage) -> bool {
        let Some(sender) = self.connections.get(peer_id).map(|entry| Arc::clone(entry.value())) else {
            debug!(peer_id = %peer_id, "Dropping message for unknown connection");
            return false;
        };

        match sender.send(message) {
            Ok(()) => true,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(peer_id = %peer_id, error = %e, "Failed to deliver message");
                false
            }
        }
    }

    /// Deliver to every peer in `audience`; returns how many were queued
    pub fn broadcast(&self, audience: &[PeerId], message: &ServerMessage) -> usize {
        audience
            .iter()
            .filter(|peer_id| self.send_to(peer_id, message.clone()))
            .count()
    }

    #[must_use]
    pub fn is_registered(&self, peer_id: &PeerId) -> bool {
        self.connections.contains_key(peer_id)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Messages lost to full or closed connections
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
