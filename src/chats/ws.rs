use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    events::{decode_frame, ServerEvent},
    presence::{ConnectionHandle, PresenceRegistry},
    session::CurrentUser,
    UserId,
};

use super::{
    dispatch::{Dispatched, EventRouter},
    service::ChatService,
};

#[debug_handler(state = crate::AppState)]
pub async fn chat_ws(
    CurrentUser(user_id): CurrentUser,
    State(chats): State<Arc<ChatService>>,
    State(config): State<Arc<Config>>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let buffer = config.outbound_buffer;

    ws.on_upgrade(async move |stream| {
        let (sender, receiver) = stream.split();
        let (session, outbound) = Session::open(user_id, chats, buffer);

        let writer_task = tokio::spawn(write_loop(sender, outbound));
        session.run(receiver).await;
        writer_task.abort();
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Reading,
    Closed,
}

/// One live connection: registered in presence while it reads, removed from
/// presence when the read loop ends for any reason.
pub struct Session {
    user_id: UserId,
    connection: ConnectionHandle,
    presence: Arc<PresenceRegistry>,
    router: EventRouter,
    state: SessionState,
}

impl Session {
    pub fn open(
        user_id: UserId,
        chats: Arc<ChatService>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (connection, outbound) = ConnectionHandle::channel(buffer);
        let presence = chats.presence().clone();

        if let Some(previous) = presence.register(user_id, connection.clone()) {
            info!(user_id, previous = %previous.id(), "newer connection replaces presence binding");
        }
        info!(user_id, connection_id = %connection.id(), "connected");

        let session = Self {
            user_id,
            connection,
            presence,
            router: EventRouter::new(chats),
            state: SessionState::Connected,
        };
        (session, outbound)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(user_id = self.user_id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Reads frames until the client closes or the transport fails. Malformed
    /// or unknown frames are logged and skipped.
    pub async fn run<R, E>(mut self, mut receiver: R) -> SessionState
    where
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: std::fmt::Display,
    {
        self.transition(SessionState::Reading);

        while let Some(frame) = receiver.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    debug!(user_id = self.user_id, %err, "transport read failed");
                    break;
                }
            };

            match frame {
                Message::Text(text) => self.handle_frame(text.as_bytes()).await,
                Message::Binary(bytes) => self.handle_frame(&bytes).await,
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }

        self.close();
        self.state
    }

    async fn handle_frame(&self, raw: &[u8]) {
        let event = match decode_frame(raw) {
            Ok(event) => event,
            Err(err) => {
                warn!(user_id = self.user_id, %err, "frame ignored");
                return;
            }
        };

        if let Dispatched::Broadcast(fanout) = self.router.dispatch(self.user_id, event).await {
            debug!(user_id = self.user_id, delivered = fanout.delivered.len(), "frame dispatched");
        }
    }

    fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.transition(SessionState::Closed);
        self.presence.unregister_connection(self.user_id, self.connection.id());
        info!(user_id = self.user_id, connection_id = %self.connection.id(), "disconnected");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drains the connection's outbound buffer into the socket.
pub async fn write_loop<W>(mut sender: W, mut outbound: mpsc::Receiver<ServerEvent>)
where
    W: Sink<Message> + Unpin,
{
    while let Some(event) = outbound.recv().await {
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "outbound frame not serializable");
                continue;
            }
        };
        if sender.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}
