//! Connection message loop
//!
//! Transport-agnostic driver for one signaling connection. The transport
//! layer (`http/websocket.rs`) only supplies a [`StreamMessage`]
//! implementation; pushes and replies leave through the dispatcher.
//!
//! Requests of one connection are handled strictly in order by a worker
//! task. The reader keeps watching the socket meanwhile, so a disconnect is
//! noticed (and the peer torn down) even while a request is still waiting
//! on the media router.

use crate::impls::error::SessionError;
use crate::impls::session::Session;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Requests queued per connection before new ones are refused
pub const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Receiving half of a client connection
#[async_trait::async_trait]
pub trait StreamMessage: Send {
    /// Next text frame. `None` once the connection is closed.
    async fn recv(&mut self) -> Option<Result<String, String>>;
}

/// Drives a [`Session`] from a [`StreamMessage`]
pub struct StreamMessageHandler {
    session: Session,
}

impl StreamMessageHandler {
    #[must_use]
    pub const fn new(session: Session) -> Self {
        Self { session }
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Run until the stream ends, then tear the session down
    pub async fn run<S: StreamMessage>(&self, stream: &mut S) {
        let peer_id = self.session.peer_id().clone();
        info!(peer_id = %peer_id, "Signaling connection opened");

        let (tx, mut rx) = mpsc::channel::<String>(REQUEST_QUEUE_CAPACITY);
        let worker_session = self.session.clone();
        let worker = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                worker_session.handle_text(&text).await;
            }
        });

        loop {
            match stream.recv().await {
                Some(Ok(text)) => {
                    if let Err(e) = tx.try_send(text) {
                        match e {
                            mpsc::error::TrySendError::Full(_) => {
                                warn!(peer_id = %peer_id, "Request queue full, dropping request");
                                self.session.push_error(
                                    None,
                                    &SessionError::Capacity("Too many pending requests".to_string()),
                                );
                            }
                            mpsc::error::TrySendError::Closed(_) => break,
                        }
                    }
                }
                Some(Err(e)) => {
                    debug!(peer_id = %peer_id, error = %e, "Connection error");
                    break;
                }
                None => break,
            }
        }

        drop(tx);
        self.session.disconnect();

        if let Err(e) = worker.await {
            warn!(peer_id = %peer_id, error = %e, "Request worker terminated abnormally");
        }
        info!(peer_id = %peer_id, "Signaling connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::dispatcher::{ChannelSender, Dispatcher};
    use crate::impls::session::{SessionContext, SessionState};
    use huddle_sfu::{LocalRouter, Registry, RoomId, SfuConfig};
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct ScriptedStream {
        frames: VecDeque<String>,
    }

    #[async_trait::async_trait]
    impl StreamMessage for ScriptedStream {
        async fn recv(&mut self) -> Option<Result<String, String>> {
            self.frames.pop_front().map(Ok)
        }
    }

    #[tokio::test]
    async fn test_stream_end_tears_down_peer() {
        let ctx = SessionContext {
            registry: Arc::new(Registry::new(&SfuConfig::default())),
            router: Arc::new(LocalRouter::default()),
            dispatcher: Arc::new(Dispatcher::new()),
            max_chat_length: 100,
        };
        let (tx, _rx) = mpsc::channel(64);
        let session = Session::new(ctx.clone(), Arc::new(ChannelSender::new(tx)));
        let handler = StreamMessageHandler::new(session);

        let mut stream = ScriptedStream {
            frames: VecDeque::from(vec![
                r#"{"id":1,"event":"join-room","data":{"roomId":"abc123","email":"a@example.com"}}"#.to_string(),
            ]),
        };
        handler.run(&mut stream).await;

        assert_eq!(handler.session().state(), SessionState::Left);
        assert!(!ctx.registry.has_room(&RoomId::from("abc123")));
        assert_eq!(ctx.dispatcher.connection_count(), 0);
    }
}
