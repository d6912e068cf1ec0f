//! WebSocket signaling endpoint
//!
//! Adapts an axum socket onto the transport-agnostic `StreamMessageHandler`:
//! text frames go in through [`StreamMessage`], server messages come out
//! through a bounded channel drained by a writer task.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{stream::SplitStream, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::http::AppState;
use crate::impls::{ChannelSender, Session, StreamMessage, StreamMessageHandler};
use crate::proto::ServerMessage;

/// WebSocket stream implementation of `StreamMessage`
struct WebSocketStream {
    receiver: SplitStream<WebSocket>,
}

#[async_trait::async_trait]
impl StreamMessage for WebSocketStream {
    async fn recv(&mut self) -> Option<Result<String, String>> {
        loop {
            match self.receiver.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_string())),
                Some(Ok(Message::Close(_))) => return None,
                Some(Err(e)) => return Some(Err(format!("WebSocket error: {e}"))),
                None => return None,
                Some(Ok(_)) => {
                    // Binary, ping and pong frames carry no signaling
                }
            }
        }
    }
}

/// Upgrade to a signaling connection
pub async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_message_size(state.config.server.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.config.session.outbound_buffer);
    let session = Session::new(state.session_context(), Arc::new(ChannelSender::new(tx)));
    let peer_id = session.peer_id().clone();

    let (mut sink, receiver) = socket.split();

    let writer_peer = peer_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.encode() {
                Ok(text) => text,
                Err(e) => {
                    error!(peer_id = %writer_peer, error = %e, "Dropping unencodable message");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!(peer_id = %writer_peer, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let handler = StreamMessageHandler::new(session);
    let mut stream = WebSocketStream { receiver };
    handler.run(&mut stream).await;

    // The dispatcher dropped its sender on disconnect; the writer finishes
    // once the last queued message is flushed.
    drop(handler);
    if let Err(e) = writer.await {
        error!(peer_id = %peer_id, error = %e, "WebSocket writer task failed");
    }
}
