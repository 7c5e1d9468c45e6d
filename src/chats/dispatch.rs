use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::{
    broadcast::Fanout,
    error::{ChatError, ChatResult},
    events::ClientEvent,
    UserId,
};

use super::service::{ChatService, Posted};

/// What became of one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Broadcast(Fanout),
    Duplicate,
    Dropped,
}

impl From<Posted> for Dispatched {
    fn from(posted: Posted) -> Self {
        match posted {
            Posted::Sent { fanout, .. } => Dispatched::Broadcast(fanout),
            Posted::Duplicate => Dispatched::Duplicate,
        }
    }
}

/// Routes inbound frames to the chat service. Nothing is ever reported back
/// to the sender: rejected frames are logged and dropped.
#[derive(Clone)]
pub struct EventRouter {
    chats: Arc<ChatService>,
}

impl EventRouter {
    pub fn new(chats: Arc<ChatService>) -> Self {
        Self { chats }
    }

    pub async fn dispatch(&self, user_id: UserId, event: ClientEvent) -> Dispatched {
        let kind = event.kind();
        let chat_id = event.chat_id().to_owned();

        match self.route(user_id, event).await {
            Ok(Dispatched::Duplicate) => {
                debug!(user_id, chat_id, kind, "duplicate id, not rebroadcast");
                Dispatched::Duplicate
            }
            Ok(dispatched) => dispatched,
            Err(ChatError::Forbidden) => {
                warn!(user_id, chat_id, kind, "sender is not a participant, event dropped");
                Dispatched::Dropped
            }
            Err(err @ ChatError::Store(_)) => {
                error!(user_id, chat_id, kind, %err, "event dropped");
                Dispatched::Dropped
            }
            Err(err) => {
                warn!(user_id, chat_id, kind, %err, "event dropped");
                Dispatched::Dropped
            }
        }
    }

    /// Reactions name a message, which may belong to another chat than the
    /// frame claims, so the frame's chat is checked here and the message's
    /// chat again by the service.
    async fn route(&self, user_id: UserId, event: ClientEvent) -> ChatResult<Dispatched> {
        let dispatched = match event {
            ClientEvent::Message {
                chat_id,
                message_id,
                content,
            } => self
                .chats
                .send_message(user_id, &chat_id, &message_id, &content)
                .await?
                .into(),
            ClientEvent::Reaction {
                chat_id,
                reaction_id,
                message_id,
                reaction_code,
            } => {
                self.chats.authorize(user_id, &chat_id).await?;
                self.chats
                    .add_reaction(user_id, &message_id, &reaction_id, &reaction_code)
                    .await?
                    .into()
            }
            ClientEvent::ReactionRemoved {
                chat_id,
                message_id,
                reaction_code,
            } => {
                self.chats.authorize(user_id, &chat_id).await?;
                let fanout = self
                    .chats
                    .remove_reaction(user_id, &message_id, &reaction_code)
                    .await?;
                Dispatched::Broadcast(fanout)
            }
            ClientEvent::Typing { chat_id, is_typing } => {
                Dispatched::Broadcast(self.chats.typing(user_id, &chat_id, is_typing).await?)
            }
            ClientEvent::ReadReceipt { chat_id, message_id } => {
                Dispatched::Broadcast(self.chats.mark_read(user_id, &chat_id, &message_id).await?)
            }
        };
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chats::service::testing::harness,
        events::ServerEvent,
        presence::ConnectionHandle,
        store::{testing::group, ChatStore},
    };

    fn message(chat_id: &str, message_id: &str, content: &str) -> ClientEvent {
        ClientEvent::Message {
            chat_id: chat_id.into(),
            message_id: message_id.into(),
            content: content.into(),
        }
    }

    #[tokio::test]
    async fn scenario_three_participants() {
        let h = harness().await;
        group(&h.store, "c1", &[1, 2, 3]).await;
        let (two, mut two_rx) = ConnectionHandle::channel(8);
        let (three, mut three_rx) = ConnectionHandle::channel(8);
        h.chats.presence().register(2, two);
        h.chats.presence().register(3, three);
        let router = EventRouter::new(h.chats.clone());

        let dispatched = router.dispatch(1, message("c1", "m1", "hi")).await;
        let Dispatched::Broadcast(fanout) = dispatched else {
            panic!("message should be broadcast");
        };
        assert_eq!(fanout.delivered, vec![2, 3]);

        assert_eq!(router.dispatch(1, message("c1", "m1", "edited")).await, Dispatched::Duplicate);

        for rx in [&mut two_rx, &mut three_rx] {
            let frame = rx.recv().await;
            let Some(ServerEvent::Message { message_id, sender_id, .. }) = frame else {
                panic!("expected a message frame");
            };
            assert_eq!((message_id.as_str(), sender_id), ("m1", 1));
            assert!(rx.try_recv().is_err());
        }

        let stored = h.store.messages("c1", 10, 0).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!((stored[0].chat_id.as_str(), stored[0].sender_id), ("c1", 1));
    }

    #[tokio::test]
    async fn store_outage_drops_frame_without_broadcast() {
        let h = harness().await;
        group(&h.store, "c1", &[1, 2]).await;
        let (two, mut two_rx) = ConnectionHandle::channel(8);
        h.chats.presence().register(2, two);
        let router = EventRouter::new(h.chats.clone());

        h.store.pool().close().await;

        assert_eq!(router.dispatch(1, message("c1", "m1", "hi")).await, Dispatched::Dropped);
        assert!(two_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn outsider_reaction_is_dropped_silently() {
        let h = harness().await;
        group(&h.store, "c1", &[1, 2]).await;
        group(&h.store, "c9", &[9]).await;
        h.chats.send_message(1, "c1", "m1", "hi").await.unwrap();
        let (one, mut one_rx) = ConnectionHandle::channel(8);
        h.chats.presence().register(1, one);
        let router = EventRouter::new(h.chats.clone());

        // claims the message through a chat the outsider belongs to
        let sneaky = ClientEvent::Reaction {
            chat_id: "c9".into(),
            reaction_id: "r1".into(),
            message_id: "m1".into(),
            reaction_code: "like".into(),
        };
        assert_eq!(router.dispatch(9, sneaky).await, Dispatched::Dropped);

        let direct = ClientEvent::Reaction {
            chat_id: "c1".into(),
            reaction_id: "r2".into(),
            message_id: "m1".into(),
            reaction_code: "like".into(),
        };
        assert_eq!(router.dispatch(9, direct).await, Dispatched::Dropped);
        assert!(one_rx.try_recv().is_err());
        assert_eq!(h.store.remove_reactions("m1", 9, "like").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn removal_of_missing_reaction_still_broadcasts() {
        let h = harness().await;
        group(&h.store, "c1", &[1, 2]).await;
        h.chats.send_message(1, "c1", "m1", "hi").await.unwrap();
        let (two, mut two_rx) = ConnectionHandle::channel(8);
        h.chats.presence().register(2, two);
        let router = EventRouter::new(h.chats.clone());

        let remove = ClientEvent::ReactionRemoved {
            chat_id: "c1".into(),
            message_id: "m1".into(),
            reaction_code: "love".into(),
        };
        assert!(matches!(router.dispatch(1, remove).await, Dispatched::Broadcast(_)));
        assert!(matches!(
            two_rx.recv().await,
            Some(ServerEvent::ReactionRemoved { user_id: 1, .. })
        ));
    }

    #[tokio::test]
    async fn typing_never_reaches_the_sender() {
        let h = harness().await;
        group(&h.store, "c1", &[1, 2]).await;
        let (one, mut one_rx) = ConnectionHandle::channel(8);
        let (two, mut two_rx) = ConnectionHandle::channel(8);
        h.chats.presence().register(1, one);
        h.chats.presence().register(2, two);
        let router = EventRouter::new(h.chats.clone());

        let typing = ClientEvent::Typing {
            chat_id: "c1".into(),
            is_typing: true,
        };
        router.dispatch(1, typing).await;
        assert!(matches!(
            two_rx.recv().await,
            Some(ServerEvent::Typing { user_id: 1, is_typing: true, .. })
        ));
        assert!(one_rx.try_recv().is_err());
    }
}
