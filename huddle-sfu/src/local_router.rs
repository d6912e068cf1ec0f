//! In-process media router
//!
//! `LocalRouter` keeps the router-side view of transports, producers and
//! consumers in memory and answers the signaling handshake the way an
//! external SFU worker would: ICE credentials and host candidates from the
//! configured addresses, a DTLS fingerprint per transport, codec checks on
//! produce and consume. It owns its own bookkeeping; the registry never
//! reads it.

use crate::config::SfuConfig;
use crate::error::RouterError;
use crate::router::{ConsumerDescriptor, MediaRouter, RouterEntity, TransportDescriptor};
use crate::rtp::{
    DtlsFingerprint, DtlsParameters, IceCandidate, IceParameters, RtpCapabilities,
    RtpCodecParameters, RtpParameters,
};
use crate::types::{ConsumerId, MediaKind, ProducerId, RoomId, TransportDirection, TransportId};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info};

struct LocalTransport {
    direction: TransportDirection,
    room_id: RoomId,
    port: u16,
    connected: bool,
    producers: HashSet<ProducerId>,
    consumers: HashSet<ConsumerId>,
}

struct LocalProducer {
    transport_id: TransportId,
    kind: MediaKind,
    codec: RtpCodecParameters,
    consumers: HashSet<ConsumerId>,
}

struct LocalConsumer {
    transport_id: TransportId,
    producer_id: ProducerId,
    paused: bool,
}

/// Round-robin allocator over the configured RTC port range
struct PortPool {
    min: u16,
    max: u16,
    next: u16,
    in_use: BTreeSet<u16>,
}

impl PortPool {
    fn new(min: u16, max: u16) -> Self {
        Self {
            min,
            max,
            next: min,
            in_use: BTreeSet::new(),
        }
    }

    fn acquire(&mut self) -> Result<u16, RouterError> {
        let span = u32::from(self.max - self.min) + 1;
        for _ in 0..span {
            let candidate = self.next;
            self.next = if self.next >= self.max { self.min } else { self.next + 1 };
            if self.in_use.insert(candidate) {
                return Ok(candidate);
            }
        }
        Err(RouterError::PortsExhausted {
            min: self.min,
            max: self.max,
        })
    }

    fn release(&mut self, port: u16) {
        self.in_use.remove(&port);
    }
}

/// In-process media router
pub struct LocalRouter {
    config: SfuConfig,
    closed: AtomicBool,
    ports: Mutex<PortPool>,
    mid_counter: AtomicU32,
    transports: DashMap<TransportId, LocalTransport>,
    producers: DashMap<ProducerId, LocalProducer>,
    consumers: DashMap<ConsumerId, LocalConsumer>,
}

impl LocalRouter {
    #[must_use]
    pub fn new(config: SfuConfig) -> Self {
        let (min, max) = if config.rtc_min_port <= config.rtc_max_port {
            (config.rtc_min_port, config.rtc_max_port)
        } else {
            (config.rtc_max_port, config.rtc_min_port)
        };

        info!(
            codecs = config.media_codecs.len(),
            rtc_min_port = min,
            rtc_max_port = max,
            announced_ip = %config.candidate_ip(),
            "Local media router initialized"
        );

        Self {
            ports: Mutex::new(PortPool::new(min, max)),
            config,
            closed: AtomicBool::new(false),
            mid_counter: AtomicU32::new(0),
            transports: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
        }
    }

    /// Close the router and every entity it holds. All later calls fail
    /// with [`RouterError::Closed`].
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let transports: Vec<TransportId> = self.transports.iter().map(|e| e.key().clone()).collect();
        for transport_id in transports {
            self.close_transport(&transport_id);
        }
        info!("Local media router closed");
    }

    /// Number of live (transports, producers, consumers)
    #[must_use]
    pub fn entity_counts(&self) -> (usize, usize, usize) {
        (self.transports.len(), self.producers.len(), self.consumers.len())
    }

    /// Whether a consumer exists and is still paused
    #[must_use]
    pub fn is_consumer_paused(&self, consumer_id: &ConsumerId) -> Option<bool> {
        self.consumers.get(consumer_id).map(|c| c.paused)
    }

    fn ensure_open(&self) -> Result<(), RouterError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(RouterError::Closed)
        } else {
            Ok(())
        }
    }

    fn random_token(len: usize) -> String {
        nanoid::nanoid!(len)
    }

    /// SHA-256 style fingerprint, colon separated upper-case hex
    fn random_fingerprint() -> String {
        let mut bytes = Vec::with_capacity(32);
        bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        bytes
            .iter()
            .map(|b| hex::encode_upper([*b]))
            .collect::<Vec<_>>()
            .join(":")
    }

    fn random_ssrc() -> u32 {
        let bytes = uuid::Uuid::new_v4();
        let b = bytes.as_bytes();
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    fn candidates(&self, port: u16) -> Vec<IceCandidate> {
        let ip = self.config.candidate_ip().to_string();
        let (udp_priority, tcp_priority) = if self.config.prefer_udp {
            (1_076_302_079, 1_076_276_479)
        } else {
            (1_076_276_479, 1_076_302_079)
        };

        let mut candidates = Vec::new();
        if self.config.enable_udp {
            candidates.push(IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: udp_priority,
                ip: ip.clone(),
                port,
                protocol: "udp".to_string(),
                candidate_type: "host".to_string(),
                tcp_type: None,
            });
        }
        if self.config.enable_tcp {
            candidates.push(IceCandidate {
                foundation: "tcpcandidate".to_string(),
                priority: tcp_priority,
                ip,
                port,
                protocol: "tcp".to_string(),
                candidate_type: "host".to_string(),
                tcp_type: Some("passive".to_string()),
            });
        }
        candidates
    }

    fn close_consumer(&self, consumer_id: &ConsumerId) {
        let Some((_, consumer)) = self.consumers.remove(consumer_id) else {
            return;
        };
        if let Some(mut producer) = self.producers.get_mut(&consumer.producer_id) {
            producer.consumers.remove(consumer_id);
        }
        if let Some(mut transport) = self.transports.get_mut(&consumer.transport_id) {
            transport.consumers.remove(consumer_id);
        }
        debug!(consumer_id = %consumer_id, "Router consumer closed");
    }

    fn close_producer(&self, producer_id: &ProducerId) {
        let Some((_, producer)) = self.producers.remove(producer_id) else {
            return;
        };
        for consumer_id in &producer.consumers {
            self.close_consumer(consumer_id);
        }
        if let Some(mut transport) = self.transports.get_mut(&producer.transport_id) {
            transport.producers.remove(producer_id);
        }
        debug!(producer_id = %producer_id, "Router producer closed");
    }

    fn close_transport(&self, transport_id: &TransportId) {
        let Some((_, transport)) = self.transports.remove(transport_id) else {
            return;
        };
        for producer_id in &transport.producers {
            self.close_producer(producer_id);
        }
        for consumer_id in &transport.consumers {
            self.close_consumer(consumer_id);
        }
        self.ports.lock().release(transport.port);
        debug!(
            transport_id = %transport_id,
            room_id = %transport.room_id,
            "Router transport closed"
        );
    }
}

impl Default for LocalRouter {
    fn default() -> Self {
        Self::new(SfuConfig::default())
    }
}

#[async_trait]
impl MediaRouter for LocalRouter {
    fn capabilities(&self) -> RtpCapabilities {
        RtpCapabilities {
            codecs: self.config.media_codecs.clone(),
            header_extensions: Vec::new(),
        }
    }

    async fn create_transport(
        &self,
        direction: TransportDirection,
        room_id: &RoomId,
    ) -> Result<TransportDescriptor, RouterError> {
        self.ensure_open()?;

        let port = self.ports.lock().acquire()?;
        let id = TransportId::new(uuid::Uuid::new_v4().to_string());

        self.transports.insert(
            id.clone(),
            LocalTransport {
                direction,
                room_id: room_id.clone(),
                port,
                connected: false,
                producers: HashSet::new(),
                consumers: HashSet::new(),
            },
        );

        debug!(transport_id = %id, %direction, port, "Router transport created");

        Ok(TransportDescriptor {
            id,
            ice_parameters: IceParameters {
                username_fragment: Self::random_token(16),
                password: Self::random_token(32),
                ice_lite: true,
            },
            ice_candidates: self.candidates(port),
            dtls_parameters: DtlsParameters {
                role: Some("auto".to_string()),
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: Self::random_fingerprint(),
                }],
            },
        })
    }

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), RouterError> {
        self.ensure_open()?;

        if dtls_parameters.fingerprints.is_empty() {
            return Err(RouterError::InvalidParameters(
                "dtlsParameters must carry at least one fingerprint".to_string(),
            ));
        }

        let mut transport = self
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| RouterError::not_found("transport", transport_id))?;
        if transport.connected {
            return Err(RouterError::Rejected("transport already connected".to_string()));
        }
        transport.connected = true;
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
        _app_data: &serde_json::Value,
    ) -> Result<ProducerId, RouterError> {
        self.ensure_open()?;

        let codec = rtp_parameters
            .codecs
            .first()
            .ok_or_else(|| RouterError::InvalidParameters("rtpParameters has no codecs".to_string()))?;
        if codec.kind() != Some(kind) {
            return Err(RouterError::InvalidParameters(format!(
                "codec {} does not match kind {kind}",
                codec.mime_type
            )));
        }
        if self.capabilities().find_compatible(codec).is_none() {
            return Err(RouterError::UnsupportedCodec(codec.mime_type.clone()));
        }

        let id = ProducerId::new(uuid::Uuid::new_v4().to_string());
        {
            let mut transport = self
                .transports
                .get_mut(transport_id)
                .ok_or_else(|| RouterError::not_found("transport", transport_id))?;
            if transport.direction != TransportDirection::Send {
                return Err(RouterError::Rejected("cannot produce on a recv transport".to_string()));
            }
            transport.producers.insert(id.clone());
        }

        self.producers.insert(
            id.clone(),
            LocalProducer {
                transport_id: transport_id.clone(),
                kind,
                codec: codec.clone(),
                consumers: HashSet::new(),
            },
        );

        debug!(producer_id = %id, %kind, codec = %codec.mime_type, "Router producer created");
        Ok(id)
    }

    async fn can_consume(&self, producer_id: &ProducerId, rtp_capabilities: &RtpCapabilities) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        self.producers
            .get(producer_id)
            .is_some_and(|producer| rtp_capabilities.find_compatible(&producer.codec).is_some())
    }

    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerDescriptor, RouterError> {
        self.ensure_open()?;

        let (kind, mut codec) = {
            let producer = self
                .producers
                .get(producer_id)
                .ok_or_else(|| RouterError::not_found("producer", producer_id))?;
            (producer.kind, producer.codec.clone())
        };
        let remote = rtp_capabilities.find_compatible(&codec).ok_or_else(|| {
            RouterError::UnsupportedCodec(format!("device cannot receive {}", codec.mime_type))
        })?;
        if let Some(payload_type) = remote.preferred_payload_type {
            codec.payload_type = payload_type;
        }
        codec.rtcp_feedback = remote.rtcp_feedback.clone();

        let id = ConsumerId::new(uuid::Uuid::new_v4().to_string());
        {
            let mut transport = self
                .transports
                .get_mut(transport_id)
                .ok_or_else(|| RouterError::not_found("transport", transport_id))?;
            if transport.direction != TransportDirection::Recv {
                return Err(RouterError::Rejected("cannot consume on a send transport".to_string()));
            }
            transport.consumers.insert(id.clone());
        }

        // The producer may have closed while we were looking at the transport
        match self.producers.get_mut(producer_id) {
            Some(mut producer) => {
                producer.consumers.insert(id.clone());
            }
            None => {
                if let Some(mut transport) = self.transports.get_mut(transport_id) {
                    transport.consumers.remove(&id);
                }
                return Err(RouterError::not_found("producer", producer_id));
            }
        }

        self.consumers.insert(
            id.clone(),
            LocalConsumer {
                transport_id: transport_id.clone(),
                producer_id: producer_id.clone(),
                paused: true,
            },
        );

        let mid = self.mid_counter.fetch_add(1, Ordering::Relaxed);
        debug!(consumer_id = %id, producer_id = %producer_id, "Router consumer created (paused)");

        Ok(ConsumerDescriptor {
            id,
            producer_id: producer_id.clone(),
            kind,
            rtp_parameters: RtpParameters {
                mid: Some(mid.to_string()),
                codecs: vec![codec],
                header_extensions: Vec::new(),
                encodings: vec![serde_json::json!({ "ssrc": Self::random_ssrc() })],
                rtcp: Some(serde_json::json!({
                    "cname": Self::random_token(8),
                    "reducedSize": true
                })),
            },
        })
    }

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<(), RouterError> {
        self.ensure_open()?;

        let mut consumer = self
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| RouterError::not_found("consumer", consumer_id))?;
        consumer.paused = false;
        Ok(())
    }

    fn close(&self, entity: RouterEntity) {
        match &entity {
            RouterEntity::Transport(id) => self.close_transport(id),
            RouterEntity::Producer(id) => self.close_producer(id),
            RouterEntity::Consumer(id) => self.close_consumer(id),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::default_media_codecs;

    fn vp8_parameters() -> RtpParameters {
        RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "video/VP8".to_string(),
                payload_type: 96,
                clock_rate: 90000,
                channels: None,
                parameters: serde_json::Map::new(),
                rtcp_feedback: Vec::new(),
            }],
            ..RtpParameters::default()
        }
    }

    fn client_dtls() -> DtlsParameters {
        DtlsParameters {
            role: Some("client".to_string()),
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".to_string(),
                value: "AA:BB".to_string(),
            }],
        }
    }

    fn device_caps() -> RtpCapabilities {
        RtpCapabilities {
            codecs: default_media_codecs(),
            header_extensions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_transport_descriptor_uses_config() {
        let config = SfuConfig {
            rtc_min_port: 40000,
            rtc_max_port: 40001,
            enable_tcp: false,
            announced_ip: Some("203.0.113.7".to_string()),
            ..SfuConfig::default()
        };
        let router = LocalRouter::new(config);
        let room = RoomId::from("abc123");

        let transport = router
            .create_transport(TransportDirection::Send, &room)
            .await
            .unwrap();
        assert_eq!(transport.ice_candidates.len(), 1);
        assert_eq!(transport.ice_candidates[0].ip, "203.0.113.7");
        assert_eq!(transport.ice_candidates[0].port, 40000);
        assert_eq!(transport.dtls_parameters.fingerprints[0].value.len(), 32 * 3 - 1);
    }

    #[tokio::test]
    async fn test_port_range_exhaustion_and_release() {
        let config = SfuConfig {
            rtc_min_port: 40000,
            rtc_max_port: 40001,
            ..SfuConfig::default()
        };
        let router = LocalRouter::new(config);
        let room = RoomId::from("abc123");

        let first = router.create_transport(TransportDirection::Send, &room).await.unwrap();
        router.create_transport(TransportDirection::Recv, &room).await.unwrap();
        let err = router
            .create_transport(TransportDirection::Recv, &room)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::PortsExhausted { .. }));

        router.close(RouterEntity::Transport(first.id));
        assert!(router.create_transport(TransportDirection::Send, &room).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_requires_fingerprint_and_only_once() {
        let router = LocalRouter::default();
        let room = RoomId::from("abc123");
        let transport = router.create_transport(TransportDirection::Send, &room).await.unwrap();

        let err = router
            .connect_transport(&transport.id, &DtlsParameters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidParameters(_)));

        router.connect_transport(&transport.id, &client_dtls()).await.unwrap();
        let err = router
            .connect_transport(&transport.id, &client_dtls())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_produce_validates_codec() {
        let router = LocalRouter::default();
        let room = RoomId::from("abc123");
        let send = router.create_transport(TransportDirection::Send, &room).await.unwrap();

        let mut bogus = vp8_parameters();
        bogus.codecs[0].mime_type = "video/AV1".to_string();
        let err = router
            .produce(&send.id, MediaKind::Video, &bogus, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::UnsupportedCodec(_)));

        let err = router
            .produce(&send.id, MediaKind::Audio, &vp8_parameters(), &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidParameters(_)));

        assert!(router
            .produce(&send.id, MediaKind::Video, &vp8_parameters(), &serde_json::Value::Null)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_consume_flow_and_producer_cascade() {
        let router = LocalRouter::default();
        let room = RoomId::from("abc123");
        let send = router.create_transport(TransportDirection::Send, &room).await.unwrap();
        let recv = router.create_transport(TransportDirection::Recv, &room).await.unwrap();

        let producer = router
            .produce(&send.id, MediaKind::Video, &vp8_parameters(), &serde_json::Value::Null)
            .await
            .unwrap();
        assert!(router.can_consume(&producer, &device_caps()).await);
        assert!(!router.can_consume(&producer, &RtpCapabilities::default()).await);

        let consumer = router.consume(&recv.id, &producer, &device_caps()).await.unwrap();
        assert_eq!(consumer.kind, MediaKind::Video);
        assert_eq!(consumer.rtp_parameters.codecs[0].payload_type, 101);
        assert_eq!(router.is_consumer_paused(&consumer.id), Some(true));

        router.resume_consumer(&consumer.id).await.unwrap();
        assert_eq!(router.is_consumer_paused(&consumer.id), Some(false));

        router.close(RouterEntity::Producer(producer));
        assert_eq!(router.is_consumer_paused(&consumer.id), None);
        assert_eq!(router.entity_counts(), (2, 0, 0));
    }

    #[tokio::test]
    async fn test_direction_is_enforced() {
        let router = LocalRouter::default();
        let room = RoomId::from("abc123");
        let send = router.create_transport(TransportDirection::Send, &room).await.unwrap();
        let recv = router.create_transport(TransportDirection::Recv, &room).await.unwrap();

        let err = router
            .produce(&recv.id, MediaKind::Video, &vp8_parameters(), &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Rejected(_)));

        let producer = router
            .produce(&send.id, MediaKind::Video, &vp8_parameters(), &serde_json::Value::Null)
            .await
            .unwrap();
        let err = router.consume(&send.id, &producer, &device_caps()).await.unwrap_err();
        assert!(matches!(err, RouterError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_everything() {
        let router = LocalRouter::default();
        let room = RoomId::from("abc123");
        router.create_transport(TransportDirection::Send, &room).await.unwrap();

        router.shutdown();
        assert!(router.is_closed());
        assert_eq!(router.entity_counts(), (0, 0, 0));
        assert_eq!(
            router
                .create_transport(TransportDirection::Send, &room)
                .await
                .unwrap_err(),
            RouterError::Closed
        );
    }
}
