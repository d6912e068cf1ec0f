//! Per-connection signaling session
//!
//! A session walks `Connected → Joining → Joined (→ Producing) → Left`.
//! Requests are handled one at a time per connection, but `disconnect` may
//! run concurrently with an in-flight request. Every operation that awaits
//! the media router applies its registry mutation afterwards through an
//! atomic registry call that re-checks the peer, and releases the router
//! entity again if the peer is gone.
//!
//! Replies are queued on the caller's connection before any fan-out about
//! the same operation is queued for other peers.

use crate::impls::dispatcher::{Dispatcher, MessageSender};
use crate::impls::error::{SessionError, SessionResult};
use crate::proto::{
    events, ChatMessageEvent, ChatMessageRequest, ClientFrame, ClientRequest, CloseProducerRequest,
    ConnectTransportRequest, ConsumeRequest, ConsumerClosedEvent, CreateTransportRequest, JoinRoomRequest,
    JoinRoomResponse, NewProducerEvent, ProduceRequest, ProduceResponse, ResumeConsumerRequest, ServerMessage,
    UserLeftEvent,
};
use chrono::SecondsFormat;
use huddle_core::validation::{ChatMessageValidator, EmailValidator, RoomIdValidator};
use huddle_sfu::{
    ConsumerRecord, JoinOutcome, MediaRouter, PeerId, PeerInfo, PeerKey, ProducerRecord, Registry, RoomId, RouterEntity, SfuPeer,
    Teardown, TransportRecord,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Services shared by every session
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<Registry>,
    pub router: Arc<dyn MediaRouter>,
    pub dispatcher: Arc<Dispatcher>,
    pub max_chat_length: usize,
}

/// Observable protocol phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Joining,
    Joined,
    /// Joined with at least one producer
    Producing,
    Left,
}

enum Phase {
    Connected,
    Joining,
    Joined {
        key: PeerKey,
        email: String,
        producing: bool,
    },
    Left,
}

/// One delivery computed by an operation, sent after its reply
struct Fanout {
    audience: Vec<PeerId>,
    message: ServerMessage,
}

impl Fanout {
    fn to(peer_id: PeerId, message: ServerMessage) -> Self {
        Self {
            audience: vec![peer_id],
            message,
        }
    }
}

/// Successful outcome: reply payload plus deferred fan-out
struct Handled {
    data: Value,
    fanout: Vec<Fanout>,
}

impl Handled {
    fn reply(data: impl Serialize) -> Self {
        Self {
            data: serde_json::to_value(data).unwrap_or_default(),
            fanout: Vec::new(),
        }
    }

    fn empty() -> Self {
        Self::reply(json!({}))
    }

    fn then(mut self, fanout: Vec<Fanout>) -> Self {
        self.fanout.extend(fanout);
        self
    }
}

struct SessionInner {
    peer_id: PeerId,
    ctx: SessionContext,
    phase: Mutex<Phase>,
}

/// Signaling session of one connection
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session and register its outbound sender with the
    /// dispatcher
    pub fn new(ctx: SessionContext, sender: Arc<dyn MessageSender>) -> Self {
        let peer_id = PeerId::generate();
        ctx.dispatcher.register(peer_id.clone(), sender);

        Self {
            inner: Arc::new(SessionInner {
                peer_id,
                ctx,
                phase: Mutex::new(Phase::Connected),
            }),
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.inner.peer_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        match &*self.inner.phase.lock() {
            Phase::Connected => SessionState::Connected,
            Phase::Joining => SessionState::Joining,
            Phase::Joined { producing: true, .. } => SessionState::Producing,
            Phase::Joined { .. } => SessionState::Joined,
            Phase::Left => SessionState::Left,
        }
    }

    /// Handle one raw text frame from the client
    pub async fn handle_text(&self, text: &str) {
        match ClientFrame::decode(text) {
            Ok(frame) => self.handle_frame(frame).await,
            Err(e) => self.push_error(None, &SessionError::BadRequest(e)),
        }
    }

    /// Handle one decoded frame: run the request, reply, then fan out
    pub async fn handle_frame(&self, frame: ClientFrame) {
        let ClientFrame { id, event, data } = frame;
        let result = match ClientRequest::from_event(&event, data) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => Err(SessionError::BadRequest(e)),
        };

        match result {
            Ok(handled) => {
                let delivered = id.is_none_or(|id| self.reply(ServerMessage::success(id, handled.data)));
                self.flush(handled.fanout);
                if !delivered {
                    self.close_slow_connection();
                }
            }
            Err(err) => {
                match &err {
                    SessionError::Forbidden { .. } => {
                        warn!(peer_id = %self.inner.peer_id, event = %event, error = %err, "Request rejected");
                    }
                    _ => debug!(peer_id = %self.inner.peer_id, event = %event, error = %err, "Request failed"),
                }
                match id {
                    Some(id) => {
                        if !self.reply(ServerMessage::failure(id, err.to_body(None))) {
                            self.close_slow_connection();
                        }
                    }
                    None => self.push_error(Some(&event), &err),
                }
            }
        }
    }

    /// Leave the room (if joined) and detach from the dispatcher. Safe to
    /// call more than once and concurrently with an in-flight request.
    pub fn disconnect(&self) {
        let fanout = self.depart();
        self.flush(fanout);
        self.inner.ctx.dispatcher.unregister(&self.inner.peer_id);
        info!(peer_id = %self.inner.peer_id, "Session closed");
    }

    /// Push an `error` event to this connection
    pub(crate) fn push_error(&self, event: Option<&str>, err: &SessionError) {
        self.send_self(ServerMessage::push(events::ERROR, err.to_body(event)));
    }

    async fn dispatch(&self, request: ClientRequest) -> SessionResult<Handled> {
        match request {
            ClientRequest::JoinRoom(request) => self.join(request),
            ClientRequest::CreateTransport(request) => self.create_transport(request).await,
            ClientRequest::ConnectTransport(request) => self.connect_transport(request).await,
            ClientRequest::Produce(request) => self.produce(request).await,
            ClientRequest::Consume(request) => self.consume(request).await,
            ClientRequest::ResumeConsumer(request) => self.resume_consumer(request).await,
            ClientRequest::CloseProducer(request) => self.close_producer(request),
            ClientRequest::ChatMessage(request) => self.chat(request),
            ClientRequest::LeaveRoom => Ok(Handled::empty().then(self.depart())),
        }
    }

    fn join(&self, request: JoinRoomRequest) -> SessionResult<Handled> {
        {
            let mut phase = self.inner.phase.lock();
            match *phase {
                Phase::Connected => *phase = Phase::Joining,
                Phase::Joining | Phase::Joined { .. } => return Err(SessionError::AlreadyJoined),
                Phase::Left => return Err(SessionError::invalid_state("Connection already left its room")),
            }
        }

        let result = self.try_join(request);
        if result.is_err() {
            let mut phase = self.inner.phase.lock();
            if matches!(*phase, Phase::Joining) {
                *phase = Phase::Connected;
            }
        }
        result
    }

    fn try_join(&self, request: JoinRoomRequest) -> SessionResult<Handled> {
        let ctx = &self.inner.ctx;
        EmailValidator::new().validate(&request.email)?;
        RoomIdValidator::new().validate(&request.room_id)?;
        if ctx.router.is_closed() {
            return Err(SessionError::Unavailable);
        }

        let room_id = RoomId::from(request.room_id.as_str());
        let peer = SfuPeer::new(
            self.inner.peer_id.clone(),
            request.email.clone(),
            request.rtp_capabilities.clone(),
        );
        let outcome = ctx.registry.add_peer(&room_id, peer)?;
        self.settle_join(outcome, request)
    }

    /// Second half of a join, once the registry holds the peer. A disconnect
    /// may have won the race; peers that joined meanwhile already saw this
    /// one, so it leaves like any other peer.
    fn settle_join(&self, outcome: JoinOutcome, request: JoinRoomRequest) -> SessionResult<Handled> {
        let ctx = &self.inner.ctx;
        let room_id = outcome.key.room_id.clone();
        {
            let mut phase = self.inner.phase.lock();
            if !matches!(*phase, Phase::Joining) {
                drop(phase);
                let fanout = self.remove_from_room(outcome.key);
                self.flush(fanout);
                return Err(SessionError::invalid_state("Connection closed while joining"));
            }
            *phase = Phase::Joined {
                key: outcome.key.clone(),
                email: request.email.clone(),
                producing: false,
            };
        }

        info!(
            peer_id = %self.inner.peer_id,
            room_id = %room_id,
            existing_peers = outcome.existing.len(),
            room_created = outcome.room_created,
            "Peer joined room"
        );

        let me = PeerInfo {
            id: self.inner.peer_id.clone(),
            email: request.email,
            producers: Vec::new(),
        };
        let others: Vec<PeerId> = outcome.existing.iter().map(|peer| peer.id.clone()).collect();
        let snapshot = ServerMessage::push(events::EXISTING_PEERS, &outcome.existing);

        Ok(Handled::reply(JoinRoomResponse {
            peer_id: self.inner.peer_id.clone(),
            room_id: request.room_id,
            existing_peers: outcome.existing,
            router_rtp_capabilities: ctx.router.capabilities(),
        })
        .then(vec![
            Fanout::to(self.inner.peer_id.clone(), snapshot),
            Fanout {
                audience: others,
                message: ServerMessage::push(events::USER_JOINED, &me),
            },
        ]))
    }

    async fn create_transport(&self, request: CreateTransportRequest) -> SessionResult<Handled> {
        let (key, _) = self.membership()?;
        let ctx = &self.inner.ctx;
        let direction = request.direction;

        let descriptor = ctx
            .router
            .create_transport(direction, &key.room_id)
            .await
            .map_err(|e| {
                error!(peer_id = %key.peer_id, %direction, error = %e, "Transport creation failed");
                SessionError::transport_creation(e)
            })?;

        let record = TransportRecord::new(descriptor.id.clone(), direction);
        let stale = match ctx.registry.attach_transport(&key, record) {
            Ok(stale) => stale,
            Err(e) => {
                debug!(transport_id = %descriptor.id, error = %e, "Discarding transport of departed peer");
                ctx.router.close(RouterEntity::Transport(descriptor.id));
                return Err(e.into());
            }
        };

        let fanout = stale.map(|teardown| release(ctx, &teardown)).unwrap_or_default();
        Ok(Handled::reply(&descriptor).then(fanout))
    }

    async fn connect_transport(&self, request: ConnectTransportRequest) -> SessionResult<Handled> {
        let (key, _) = self.membership()?;
        let ctx = &self.inner.ctx;

        ctx.registry.begin_connect(&key, &request.transport_id)?;
        let result = ctx
            .router
            .connect_transport(&request.transport_id, &request.dtls_parameters)
            .await;
        ctx.registry
            .finish_connect(&key, &request.transport_id, result.is_ok())?;

        result.map_err(|e| {
            warn!(transport_id = %request.transport_id, error = %e, "Transport connect rejected");
            SessionError::adapter("connect transport", e)
        })?;
        Ok(Handled::empty())
    }

    async fn produce(&self, request: ProduceRequest) -> SessionResult<Handled> {
        let (key, email) = self.membership()?;
        let ctx = &self.inner.ctx;

        ctx.registry.check_producible(&key, &request.transport_id)?;

        let app_data = tag_app_data(request.app_data, &key.peer_id, &email);
        let producer_id = ctx
            .router
            .produce(&request.transport_id, request.kind, &request.rtp_parameters, &app_data)
            .await
            .map_err(|e| {
                error!(peer_id = %key.peer_id, kind = %request.kind, error = %e, "Produce failed");
                SessionError::adapter("produce", e)
            })?;

        let record = ProducerRecord {
            id: producer_id.clone(),
            kind: request.kind,
            transport_id: request.transport_id,
        };
        let audience = match ctx.registry.attach_producer(&key, record) {
            Ok(audience) => audience,
            Err(e) => {
                debug!(producer_id = %producer_id, error = %e, "Discarding producer of departed peer");
                ctx.router.close(RouterEntity::Producer(producer_id));
                return Err(e.into());
            }
        };

        if let Phase::Joined { producing, .. } = &mut *self.inner.phase.lock() {
            *producing = true;
        }
        info!(peer_id = %key.peer_id, producer_id = %producer_id, kind = %request.kind, "Producer created");

        let announcement = NewProducerEvent {
            producer_id: producer_id.clone(),
            peer_id: key.peer_id.clone(),
            email,
            kind: request.kind,
        };
        Ok(Handled::reply(ProduceResponse { id: producer_id }).then(vec![Fanout {
            audience,
            message: ServerMessage::push(events::NEW_PRODUCER, announcement),
        }]))
    }

    async fn consume(&self, request: ConsumeRequest) -> SessionResult<Handled> {
        let (key, _) = self.membership()?;
        let ctx = &self.inner.ctx;
        let producer_id = request.producer_id;

        let target = ctx.registry.consume_target(&key, &producer_id)?;
        let capabilities = request
            .rtp_capabilities
            .unwrap_or_else(|| target.rtp_capabilities.clone());

        if !ctx.router.can_consume(&producer_id, &capabilities).await {
            return Err(SessionError::IncompatibleCapabilities(producer_id));
        }

        let consumer = ctx
            .router
            .consume(&target.transport_id, &producer_id, &capabilities)
            .await
            .map_err(|e| {
                error!(peer_id = %key.peer_id, producer_id = %producer_id, error = %e, "Consume failed");
                SessionError::adapter("consume", e)
            })?;

        let record = ConsumerRecord::paused(
            consumer.id.clone(),
            consumer.kind,
            producer_id,
            target.producer_peer,
            target.transport_id,
        );
        if let Err(e) = ctx.registry.attach_consumer(&key, record) {
            debug!(consumer_id = %consumer.id, error = %e, "Discarding consumer");
            ctx.router.close(RouterEntity::Consumer(consumer.id));
            return Err(e.into());
        }

        debug!(peer_id = %key.peer_id, consumer_id = %consumer.id, "Consumer created (paused)");
        Ok(Handled::reply(&consumer))
    }

    async fn resume_consumer(&self, request: ResumeConsumerRequest) -> SessionResult<Handled> {
        let (key, _) = self.membership()?;
        let ctx = &self.inner.ctx;

        ctx.registry.get_consumer(&key, &request.consumer_id)?;
        ctx.router
            .resume_consumer(&request.consumer_id)
            .await
            .map_err(|e| {
                warn!(consumer_id = %request.consumer_id, error = %e, "Consumer resume failed");
                SessionError::adapter("resume consumer", e)
            })?;
        ctx.registry.mark_consumer_resumed(&key, &request.consumer_id)?;
        Ok(Handled::empty())
    }

    fn close_producer(&self, request: CloseProducerRequest) -> SessionResult<Handled> {
        let (key, _) = self.membership()?;
        let ctx = &self.inner.ctx;

        let teardown = ctx.registry.close_producer(&key, &request.producer_id)?;
        info!(peer_id = %key.peer_id, producer_id = %request.producer_id, "Producer closed");
        Ok(Handled::empty().then(release(ctx, &teardown)))
    }

    fn chat(&self, request: ChatMessageRequest) -> SessionResult<Handled> {
        let (key, _) = self.membership()?;
        let ctx = &self.inner.ctx;

        if request.room_id != key.room_id.as_str() {
            return Err(SessionError::Forbidden {
                entity: "room",
                id: request.room_id,
            });
        }
        ChatMessageValidator::new(ctx.max_chat_length).validate(&request.message)?;

        let delivered = ctx.registry.stamp_chat(&key, |stamp| {
            let message = ServerMessage::push(
                events::CHAT_MESSAGE,
                ChatMessageEvent {
                    email: stamp.email.clone(),
                    message: request.message.clone(),
                    timestamp: stamp.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                },
            );
            ctx.dispatcher.broadcast(&stamp.audience, &message)
        })?;

        debug!(peer_id = %key.peer_id, room_id = %key.room_id, delivered, "Chat message delivered");
        Ok(Handled::empty())
    }

    /// Move to `Left`, removing the peer if it had joined
    fn depart(&self) -> Vec<Fanout> {
        let previous = std::mem::replace(&mut *self.inner.phase.lock(), Phase::Left);
        let Phase::Joined { key, .. } = previous else {
            return Vec::new();
        };
        self.remove_from_room(key)
    }

    /// Remove the peer from the registry; the fan-out closes its router
    /// entities and tells the rest of the room
    fn remove_from_room(&self, key: PeerKey) -> Vec<Fanout> {
        let ctx = &self.inner.ctx;
        match ctx.registry.remove_peer(&key) {
            Ok(departure) => {
                info!(
                    peer_id = %key.peer_id,
                    room_id = %key.room_id,
                    room_closed = departure.room_closed,
                    "Peer left room"
                );
                let mut fanout = release(ctx, &departure.teardown);
                fanout.push(Fanout {
                    audience: departure.remaining,
                    message: ServerMessage::push(events::USER_LEFT, UserLeftEvent { id: key.peer_id }),
                });
                fanout
            }
            Err(e) => {
                debug!(peer_id = %key.peer_id, error = %e, "Peer already removed");
                Vec::new()
            }
        }
    }

    fn membership(&self) -> SessionResult<(PeerKey, String)> {
        match &*self.inner.phase.lock() {
            Phase::Joined { key, email, .. } => Ok((key.clone(), email.clone())),
            Phase::Connected | Phase::Joining => Err(SessionError::invalid_state("Join a room first")),
            Phase::Left => Err(SessionError::NotFound {
                entity: "peer",
                id: self.inner.peer_id.to_string(),
            }),
        }
    }

    fn send_self(&self, message: ServerMessage) {
        self.inner.ctx.dispatcher.send_to(&self.inner.peer_id, message);
    }

    /// Queue a reply. `false` when the connection is still registered but
    /// could not take it.
    fn reply(&self, message: ServerMessage) -> bool {
        let dispatcher = &self.inner.ctx.dispatcher;
        dispatcher.send_to(&self.inner.peer_id, message) || !dispatcher.is_registered(&self.inner.peer_id)
    }

    /// A client that cannot take its own replies is dropped
    fn close_slow_connection(&self) {
        warn!(peer_id = %self.inner.peer_id, "Reply undeliverable, closing slow connection");
        self.disconnect();
    }

    fn flush(&self, fanout: Vec<Fanout>) {
        for Fanout { audience, message } in fanout {
            self.inner.ctx.dispatcher.broadcast(&audience, &message);
        }
    }
}

/// Close the router side of a teardown; owners of orphaned consumers are
/// told their consumer is gone
fn release(ctx: &SessionContext, teardown: &Teardown) -> Vec<Fanout> {
    for entity in teardown.router_entities() {
        ctx.router.close(entity);
    }

    teardown
        .orphaned
        .iter()
        .map(|orphan| {
            Fanout::to(
                orphan.peer_id.clone(),
                ServerMessage::push(
                    events::CONSUMER_CLOSED,
                    ConsumerClosedEvent {
                        consumer_id: orphan.consumer_id.clone(),
                        producer_id: orphan.producer_id.clone(),
                    },
                ),
            )
        })
        .collect()
}

/// Producers carry their owner in `appData`
fn tag_app_data(app_data: Value, peer_id: &PeerId, email: &str) -> Value {
    let mut map = match app_data {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    map.insert("peerId".to_string(), json!(peer_id));
    map.insert("email".to_string(), json!(email));
    Value::Object(map)
}
