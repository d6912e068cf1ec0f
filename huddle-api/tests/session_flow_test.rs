// Integration tests for the signaling session flow
//
// Drives complete sessions against the in-process router:
// - join / leave fan-out and room lifetime
// - produce → consume → close-producer
// - ownership checks on foreign ids
// - adapter failures and disconnects racing in-flight requests

use async_trait::async_trait;
use chrono::DateTime;
use huddle_api::impls::{ChannelSender, Dispatcher, Session, SessionContext, SessionState};
use huddle_api::proto::{ClientFrame, ServerMessage};
use huddle_sfu::{
    ConsumerDescriptor, ConsumerId, DtlsParameters, LocalRouter, MediaKind, MediaRouter, PeerId, PeerKey,
    ProducerId, Registry, RoomId, RouterEntity, RouterError, RtpCapabilities, RtpParameters, SfuConfig,
    TransportDescriptor, TransportDirection, TransportId, TransportState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

const ROOM: &str = "abc123";

// Router wrapper that can fail transport creation, or hold a finished
// `produce` until released
#[derive(Default)]
struct FakeRouter {
    inner: LocalRouter,
    fail_transports: bool,
    produce_gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

#[async_trait]
impl MediaRouter for FakeRouter {
    fn capabilities(&self) -> RtpCapabilities {
        self.inner.capabilities()
    }

    async fn create_transport(
        &self,
        direction: TransportDirection,
        room_id: &RoomId,
    ) -> Result<TransportDescriptor, RouterError> {
        if self.fail_transports {
            return Err(RouterError::PortsExhausted { min: 1, max: 1 });
        }
        self.inner.create_transport(direction, room_id).await
    }

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), RouterError> {
        self.inner.connect_transport(transport_id, dtls_parameters).await
    }

    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
        app_data: &Value,
    ) -> Result<ProducerId, RouterError> {
        let produced = self.inner.produce(transport_id, kind, rtp_parameters, app_data).await;
        if let Some((entered, release)) = &self.produce_gate {
            entered.notify_one();
            release.notified().await;
        }
        produced
    }

    async fn can_consume(&self, producer_id: &ProducerId, rtp_capabilities: &RtpCapabilities) -> bool {
        self.inner.can_consume(producer_id, rtp_capabilities).await
    }

    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerDescriptor, RouterError> {
        self.inner.consume(transport_id, producer_id, rtp_capabilities).await
    }

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<(), RouterError> {
        self.inner.resume_consumer(consumer_id).await
    }

    fn close(&self, entity: RouterEntity) {
        self.inner.close(entity);
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

struct Harness {
    ctx: SessionContext,
    router: Arc<FakeRouter>,
}

impl Harness {
    fn new() -> Self {
        Self::with_router(FakeRouter::default(), SfuConfig::default())
    }

    fn with_router(router: FakeRouter, config: SfuConfig) -> Self {
        let router = Arc::new(router);
        let ctx = SessionContext {
            registry: Arc::new(Registry::new(&config)),
            router: router.clone(),
            dispatcher: Arc::new(Dispatcher::new()),
            max_chat_length: 500,
        };
        Self { ctx, router }
    }

    fn connect(&self) -> Client {
        let (tx, rx) = mpsc::channel(256);
        let session = Session::new(self.ctx.clone(), Arc::new(ChannelSender::new(tx)));
        Client {
            session,
            rx,
            pushes: Vec::new(),
            next_id: 0,
        }
    }

    async fn join(&self, room: &str, email: &str) -> Client {
        let mut client = self.connect();
        client
            .request(
                "join-room",
                json!({ "roomId": room, "email": email, "rtpCapabilities": self.router.capabilities() }),
            )
            .await
            .unwrap();
        client
    }

    fn key(&self, client: &Client, room: &str) -> PeerKey {
        PeerKey {
            room_id: RoomId::from(room),
            peer_id: client.session.peer_id().clone(),
        }
    }
}

struct Client {
    session: Session,
    rx: mpsc::Receiver<ServerMessage>,
    pushes: Vec<(String, Value)>,
    next_id: u64,
}

impl Client {
    fn id(&self) -> String {
        self.session.peer_id().to_string()
    }

    // Send a request and return the reply payload, or the error body
    async fn request(&mut self, event: &str, data: Value) -> Result<Value, Value> {
        self.next_id += 1;
        let id = self.next_id;
        self.session
            .handle_frame(ClientFrame {
                id: Some(id),
                event: event.to_string(),
                data,
            })
            .await;

        let mut reply = None;
        while let Ok(message) = self.rx.try_recv() {
            match message {
                ServerMessage::Reply {
                    id: reply_id,
                    ok,
                    data,
                    error,
                } if reply_id == id => {
                    assert!(reply.is_none(), "duplicate reply for request {id}");
                    reply = Some(if ok {
                        Ok(data.unwrap_or_default())
                    } else {
                        Err(serde_json::to_value(error).unwrap())
                    });
                }
                ServerMessage::Push { event, data } => self.pushes.push((event, data)),
                other => panic!("unexpected message {other:?}"),
            }
        }
        reply.expect("request got no reply")
    }

    fn drain(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            if let ServerMessage::Push { event, data } = message {
                self.pushes.push((event, data));
            }
        }
    }

    // Remove and return every push of one event
    fn take(&mut self, event: &str) -> Vec<Value> {
        self.drain();
        let (taken, rest) = std::mem::take(&mut self.pushes)
            .into_iter()
            .partition::<Vec<_>, _>(|(name, _)| name == event);
        self.pushes = rest;
        taken.into_iter().map(|(_, data)| data).collect()
    }

    async fn transport(&mut self, direction: &str) -> String {
        let transport = self
            .request("create-transport", json!({ "direction": direction, "roomId": ROOM }))
            .await
            .unwrap();
        let id = transport["id"].as_str().unwrap().to_string();
        self.request(
            "connect-transport",
            json!({
                "transportId": id,
                "dtlsParameters": {
                    "role": "client",
                    "fingerprints": [{ "algorithm": "sha-256", "value": "AA:BB:CC" }]
                }
            }),
        )
        .await
        .unwrap();
        id
    }

    async fn produce_video(&mut self, transport_id: &str) -> Result<Value, Value> {
        self.request(
            "produce",
            json!({
                "transportId": transport_id,
                "kind": "video",
                "rtpParameters": {
                    "codecs": [{ "mimeType": "video/VP8", "payloadType": 96, "clockRate": 90000 }]
                },
                "appData": { "source": "webcam" }
            }),
        )
        .await
    }
}

#[tokio::test]
async fn test_two_peer_scenario() {
    let harness = Harness::new();
    let room = RoomId::from(ROOM);

    // A joins an empty room
    let mut alice = harness.connect();
    let reply = alice
        .request(
            "join-room",
            json!({ "roomId": ROOM, "email": "alice@example.com", "rtpCapabilities": harness.router.capabilities() }),
        )
        .await
        .unwrap();
    assert_eq!(reply["existingPeers"], json!([]));
    assert_eq!(reply["peerId"], alice.id());
    assert!(reply["routerRtpCapabilities"]["codecs"].as_array().is_some());
    assert_eq!(alice.take("existing-peers"), vec![json!([])]);
    assert!(harness.ctx.registry.has_room(&room));

    // B joins and sees A; A hears about B
    let mut bob = harness.join(ROOM, "bob@example.com").await;
    assert_eq!(
        bob.take("existing-peers"),
        vec![json!([{ "id": alice.id(), "email": "alice@example.com" }])]
    );
    assert_eq!(
        alice.take("user-joined"),
        vec![json!({ "id": bob.id(), "email": "bob@example.com" })]
    );
    assert!(bob.take("user-joined").is_empty());

    // A produces; only B is told
    let send = alice.transport("send").await;
    let produced = alice.produce_video(&send).await.unwrap();
    let producer_id = produced["id"].as_str().unwrap().to_string();
    assert_eq!(alice.session.state(), SessionState::Producing);
    assert!(alice.take("new-producer").is_empty());
    assert_eq!(
        bob.take("new-producer"),
        vec![json!({
            "producerId": producer_id,
            "peerId": alice.id(),
            "email": "alice@example.com",
            "kind": "video"
        })]
    );

    // B consumes, paused until resumed
    bob.transport("recv").await;
    let consumer = bob
        .request("consume", json!({ "producerId": producer_id }))
        .await
        .unwrap();
    let consumer_id = ConsumerId::from(consumer["id"].as_str().unwrap());
    assert_eq!(consumer["producerId"], producer_id.as_str());
    assert_eq!(consumer["kind"], "video");
    assert_eq!(harness.router.inner.is_consumer_paused(&consumer_id), Some(true));

    bob.request("resume-consumer", json!({ "consumerId": consumer_id }))
        .await
        .unwrap();
    assert_eq!(harness.router.inner.is_consumer_paused(&consumer_id), Some(false));

    // B leaves; A is told, the room survives
    bob.session.disconnect();
    assert_eq!(alice.take("user-left"), vec![json!({ "id": bob.id() })]);
    assert_eq!(harness.ctx.registry.peer_count(&room), Some(1));
    assert_eq!(harness.router.inner.entity_counts(), (1, 1, 0));

    // A leaves; the room is gone
    alice.session.disconnect();
    assert!(!harness.ctx.registry.has_room(&room));
    assert_eq!(harness.router.inner.entity_counts(), (0, 0, 0));
    assert_eq!(harness.ctx.dispatcher.connection_count(), 0);
}

#[tokio::test]
async fn test_close_producer_closes_consumers() {
    let harness = Harness::new();
    let mut alice = harness.join(ROOM, "alice@example.com").await;
    let mut bob = harness.join(ROOM, "bob@example.com").await;

    let send = alice.transport("send").await;
    let producer_id = alice.produce_video(&send).await.unwrap()["id"].clone();
    bob.transport("recv").await;
    let consumer = bob
        .request("consume", json!({ "producerId": producer_id }))
        .await
        .unwrap();

    // Only the owner may close it
    let err = bob
        .request("close-producer", json!({ "producerId": producer_id }))
        .await
        .unwrap_err();
    assert_eq!(err["code"], "forbidden");

    alice
        .request("close-producer", json!({ "producerId": producer_id }))
        .await
        .unwrap();
    assert_eq!(
        bob.take("consumer-closed"),
        vec![json!({ "consumerId": consumer["id"], "producerId": producer_id })]
    );
    assert_eq!(harness.ctx.registry.stats().consumers, 0);
    assert_eq!(harness.ctx.registry.stats().producers, 0);
    assert_eq!(harness.router.inner.entity_counts(), (2, 0, 0));
}

#[tokio::test]
async fn test_departure_closes_consumers_of_other_peers() {
    let harness = Harness::new();
    let mut alice = harness.join(ROOM, "alice@example.com").await;
    let mut bob = harness.join(ROOM, "bob@example.com").await;

    let send = alice.transport("send").await;
    let producer_id = alice.produce_video(&send).await.unwrap()["id"].clone();
    bob.transport("recv").await;
    bob.request("consume", json!({ "producerId": producer_id }))
        .await
        .unwrap();

    alice.session.disconnect();
    assert_eq!(bob.take("consumer-closed").len(), 1);
    assert_eq!(bob.take("user-left"), vec![json!({ "id": alice.id() })]);
    assert_eq!(harness.ctx.registry.stats().consumers, 0);
}

#[tokio::test]
async fn test_late_joiner_sees_existing_producers() {
    let harness = Harness::new();
    let mut alice = harness.join(ROOM, "alice@example.com").await;
    let send = alice.transport("send").await;
    let producer_id = alice.produce_video(&send).await.unwrap()["id"].clone();

    let mut bob = harness.join(ROOM, "bob@example.com").await;
    let snapshot = bob.take("existing-peers");
    assert_eq!(
        snapshot,
        vec![json!([{
            "id": alice.id(),
            "email": "alice@example.com",
            "producers": [{ "producerId": producer_id, "kind": "video" }]
        }])]
    );
    assert!(bob.take("new-producer").is_empty());
}

#[tokio::test]
async fn test_foreign_ids_are_forbidden_without_mutation() {
    let harness = Harness::new();
    let mut alice = harness.join(ROOM, "alice@example.com").await;
    let mut bob = harness.join(ROOM, "bob@example.com").await;

    let transport = alice
        .request("create-transport", json!({ "direction": "send" }))
        .await
        .unwrap();
    let transport_id = TransportId::from(transport["id"].as_str().unwrap());

    let err = bob
        .request(
            "connect-transport",
            json!({
                "transportId": transport_id,
                "dtlsParameters": { "fingerprints": [{ "algorithm": "sha-256", "value": "AA" }] }
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err["code"], "forbidden");

    let record = harness
        .ctx
        .registry
        .get_transport(&harness.key(&alice, ROOM), &transport_id)
        .unwrap();
    assert_eq!(record.state, TransportState::New);

    // A foreign consumer id is rejected the same way
    let send = alice.transport("send").await;
    let producer_id = alice.produce_video(&send).await.unwrap()["id"].clone();
    bob.transport("recv").await;
    let consumer = bob
        .request("consume", json!({ "producerId": producer_id }))
        .await
        .unwrap();
    let consumer_id = ConsumerId::from(consumer["id"].as_str().unwrap());

    let err = alice
        .request("resume-consumer", json!({ "consumerId": consumer_id }))
        .await
        .unwrap_err();
    assert_eq!(err["code"], "forbidden");
    assert_eq!(harness.router.inner.is_consumer_paused(&consumer_id), Some(true));
}

#[tokio::test]
async fn test_chat_reaches_whole_room_in_order() {
    let harness = Harness::new();
    let mut alice = harness.join(ROOM, "alice@example.com").await;
    let mut bob = harness.join(ROOM, "bob@example.com").await;
    let mut carol = harness.join("other-room", "carol@example.com").await;

    alice
        .request("chat-message", json!({ "roomId": ROOM, "message": "hi" }))
        .await
        .unwrap();
    alice
        .request("chat-message", json!({ "roomId": ROOM, "message": "again" }))
        .await
        .unwrap();

    let for_alice = alice.take("chat-message");
    let for_bob = bob.take("chat-message");
    assert_eq!(for_alice, for_bob);
    assert_eq!(for_bob.len(), 2);
    assert_eq!(for_bob[0]["email"], "alice@example.com");
    assert_eq!(for_bob[0]["message"], "hi");

    let first = DateTime::parse_from_rfc3339(for_bob[0]["timestamp"].as_str().unwrap()).unwrap();
    let second = DateTime::parse_from_rfc3339(for_bob[1]["timestamp"].as_str().unwrap()).unwrap();
    assert!(first < second);
    assert!(carol.take("chat-message").is_empty());

    // Posting into another room is refused
    let err = alice
        .request("chat-message", json!({ "roomId": "other-room", "message": "hi" }))
        .await
        .unwrap_err();
    assert_eq!(err["code"], "forbidden");

    let err = alice
        .request("chat-message", json!({ "roomId": ROOM, "message": "   " }))
        .await
        .unwrap_err();
    assert_eq!(err["code"], "validation_error");
}

#[tokio::test]
async fn test_fire_and_forget_failure_is_pushed() {
    let harness = Harness::new();
    let mut alice = harness.join(ROOM, "alice@example.com").await;

    alice
        .session
        .handle_text(r#"{"event":"chat-message","data":{"roomId":"abc123","message":""}}"#)
        .await;
    let errors = alice.take("error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["code"], "validation_error");
    assert_eq!(errors[0]["event"], "chat-message");
}

#[tokio::test]
async fn test_join_validation_and_limits() {
    let harness = Harness::with_router(
        FakeRouter::default(),
        SfuConfig {
            max_peers_per_room: 1,
            ..SfuConfig::default()
        },
    );

    let mut guest = harness.connect();
    let err = guest
        .request("join-room", json!({ "roomId": ROOM, "email": "guest" }))
        .await
        .unwrap_err();
    assert_eq!(err["message"], "Please enter a valid email.");

    let err = guest
        .request("join-room", json!({ "roomId": "abc", "email": "guest@example.com" }))
        .await
        .unwrap_err();
    assert_eq!(err["message"], "Invalid meeting code.");
    assert_eq!(harness.ctx.registry.room_count(), 0);

    let _alice = harness.join(ROOM, "alice@example.com").await;
    let err = guest
        .request("join-room", json!({ "roomId": ROOM, "email": "guest@example.com" }))
        .await
        .unwrap_err();
    assert_eq!(err["code"], "capacity");
    assert_eq!(guest.session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_leave_room_keeps_connection_but_blocks_rejoin() {
    let harness = Harness::new();
    let mut alice = harness.join(ROOM, "alice@example.com").await;

    alice.request("leave-room", Value::Null).await.unwrap();
    assert_eq!(alice.session.state(), SessionState::Left);
    assert!(!harness.ctx.registry.has_room(&RoomId::from(ROOM)));

    let err = alice
        .request("join-room", json!({ "roomId": ROOM, "email": "alice@example.com" }))
        .await
        .unwrap_err();
    assert_eq!(err["code"], "invalid_state");

    let err = alice
        .request("create-transport", json!({ "direction": "send" }))
        .await
        .unwrap_err();
    assert_eq!(err["code"], "not_found");
}

#[tokio::test]
async fn test_transport_creation_failure_leaves_no_state() {
    let harness = Harness::with_router(
        FakeRouter {
            fail_transports: true,
            ..FakeRouter::default()
        },
        SfuConfig::default(),
    );
    let mut alice = harness.join(ROOM, "alice@example.com").await;

    let err = alice
        .request("create-transport", json!({ "direction": "send" }))
        .await
        .unwrap_err();
    assert_eq!(err["code"], "transport_creation_failed");
    assert_eq!(err["message"], "Failed to create transport");
    assert_eq!(harness.ctx.registry.stats().transports, 0);
}

#[tokio::test]
async fn test_produce_and_consume_preconditions() {
    let harness = Harness::new();
    let mut alice = harness.join(ROOM, "alice@example.com").await;

    // Unconnected send transport
    let transport = alice
        .request("create-transport", json!({ "direction": "send" }))
        .await
        .unwrap();
    let err = alice
        .produce_video(transport["id"].as_str().unwrap())
        .await
        .unwrap_err();
    assert_eq!(err["code"], "invalid_state");

    // Connected recv transport cannot produce
    let recv = alice.transport("recv").await;
    let err = alice.produce_video(&recv).await.unwrap_err();
    assert_eq!(err["code"], "invalid_state");

    // Unsupported codec is an adapter failure with a generic message
    let send = alice.transport("send").await;
    let err = alice
        .request(
            "produce",
            json!({
                "transportId": send,
                "kind": "video",
                "rtpParameters": { "codecs": [{ "mimeType": "video/AV1", "payloadType": 98, "clockRate": 90000 }] }
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err["code"], "adapter_failure");
    assert_eq!(err["message"], "Failed to produce");
    assert_eq!(alice.session.state(), SessionState::Joined);
}

#[tokio::test]
async fn test_incompatible_capabilities_allocate_nothing() {
    let harness = Harness::new();
    let mut alice = harness.join(ROOM, "alice@example.com").await;
    let send = alice.transport("send").await;
    let producer_id = alice.produce_video(&send).await.unwrap()["id"].clone();

    let mut bob = harness.connect();
    bob.request("join-room", json!({ "roomId": ROOM, "email": "bob@example.com" }))
        .await
        .unwrap();

    // Consuming needs a connected recv transport first
    let err = bob
        .request("consume", json!({ "producerId": producer_id }))
        .await
        .unwrap_err();
    assert_eq!(err["code"], "invalid_state");

    bob.transport("recv").await;
    let err = bob
        .request("consume", json!({ "producerId": producer_id }))
        .await
        .unwrap_err();
    assert_eq!(err["code"], "incompatible_capabilities");
    assert_eq!(harness.router.inner.entity_counts().2, 0);

    // Capabilities sent with the request take precedence
    bob.request(
        "consume",
        json!({ "producerId": producer_id, "rtpCapabilities": harness.router.capabilities() }),
    )
    .await
    .unwrap();
    assert_eq!(harness.router.inner.entity_counts().2, 1);
}

#[tokio::test]
async fn test_recreated_transport_replaces_previous() {
    let harness = Harness::new();
    let mut alice = harness.join(ROOM, "alice@example.com").await;
    let mut bob = harness.join(ROOM, "bob@example.com").await;

    let first = alice.transport("send").await;
    let producer_id = alice.produce_video(&first).await.unwrap()["id"].clone();
    bob.transport("recv").await;
    bob.request("consume", json!({ "producerId": producer_id }))
        .await
        .unwrap();

    let second = alice.transport("send").await;
    assert_ne!(first, second);
    assert_eq!(bob.take("consumer-closed").len(), 1);

    let stats = harness.ctx.registry.stats();
    assert_eq!((stats.transports, stats.producers, stats.consumers), (2, 0, 0));
    assert_eq!(harness.router.inner.entity_counts(), (2, 0, 0));
}

#[tokio::test]
async fn test_disconnect_during_produce_leaves_no_producer() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let harness = Harness::with_router(
        FakeRouter {
            produce_gate: Some((entered.clone(), release.clone())),
            ..FakeRouter::default()
        },
        SfuConfig::default(),
    );
    let mut alice = harness.join(ROOM, "alice@example.com").await;
    let send = alice.transport("send").await;

    let session = alice.session.clone();
    let in_flight = tokio::spawn(async move {
        session
            .handle_frame(ClientFrame {
                id: Some(99),
                event: "produce".to_string(),
                data: json!({
                    "transportId": send,
                    "kind": "video",
                    "rtpParameters": {
                        "codecs": [{ "mimeType": "video/VP8", "payloadType": 96, "clockRate": 90000 }]
                    }
                }),
            })
            .await;
    });

    entered.notified().await;
    alice.session.disconnect();
    release.notify_one();
    in_flight.await.unwrap();

    assert!(!harness.ctx.registry.has_peer(&PeerId::from(alice.id().as_str())));
    assert_eq!(harness.ctx.registry.stats().producers, 0);
    assert_eq!(harness.router.inner.entity_counts(), (0, 0, 0));
}

#[tokio::test]
async fn test_closed_router_makes_service_unavailable() {
    let harness = Harness::new();
    harness.router.inner.shutdown();

    let mut alice = harness.connect();
    let err = alice
        .request("join-room", json!({ "roomId": ROOM, "email": "alice@example.com" }))
        .await
        .unwrap_err();
    assert_eq!(err["code"], "unavailable");
    assert!(!harness.ctx.registry.has_room(&RoomId::from(ROOM)));
}

#[tokio::test]
async fn test_concurrent_joins_create_one_room() {
    let harness = Arc::new(Harness::new());
    let mut tasks = Vec::new();
    for i in 0..16 {
        let harness = Arc::clone(&harness);
        tasks.push(tokio::spawn(async move {
            let client = harness.join("busy-room", &format!("user{i}@example.com")).await;
            client.session.peer_id().clone()
        }));
    }

    let mut peers = Vec::new();
    for task in tasks {
        peers.push(task.await.unwrap());
    }

    assert_eq!(harness.ctx.registry.room_count(), 1);
    assert_eq!(harness.ctx.registry.peer_count(&RoomId::from("busy-room")), Some(16));
    assert_eq!(peers.len(), 16);
}
