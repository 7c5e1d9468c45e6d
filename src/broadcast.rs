use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    error::ChatResult,
    events::ServerEvent,
    notify::Notifier,
    presence::PresenceRegistry,
    store::ChatStore,
    UserId,
};

/// Who should receive a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    AllBut(UserId),
}

impl Audience {
    fn includes(self, user_id: UserId) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::AllBut(excluded) => excluded != user_id,
        }
    }
}

/// Outcome of one fan-out, per participant.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Fanout {
    pub delivered: Vec<UserId>,
    pub failed: Vec<UserId>,
    pub offline: Vec<UserId>,
    /// Push jobs queued for `offline` (chat messages only, never the sender).
    pub notified: usize,
}

#[derive(Clone)]
pub struct Broadcaster {
    store: Arc<dyn ChatStore>,
    presence: Arc<PresenceRegistry>,
    notifier: Notifier,
}

impl Broadcaster {
    pub fn new(
        store: Arc<dyn ChatStore>,
        presence: Arc<PresenceRegistry>,
        notifier: Notifier,
    ) -> Self {
        Self { store, presence, notifier }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    /// Fans `event` out to the chat's participants as recorded in the store.
    /// A failed delivery to one connection is logged and does not affect the
    /// others.
    pub async fn broadcast(&self, event: &ServerEvent, audience: Audience) -> ChatResult<Fanout> {
        let chat_id = event.chat_id();
        let participants = self.store.participants(chat_id).await?;

        let mut fanout = Fanout::default();
        for user_id in participants.into_iter().filter(|&id| audience.includes(id)) {
            let Some(connection) = self.presence.lookup(user_id) else {
                fanout.offline.push(user_id);
                continue;
            };
            match connection.deliver(event.clone()) {
                Ok(()) => fanout.delivered.push(user_id),
                Err(err) => {
                    warn!(user_id, chat_id, %err, "delivery failed");
                    fanout.failed.push(user_id);
                }
            }
        }

        if let ServerEvent::Message { sender_id, content, .. } = event {
            let recipients: Vec<UserId> = fanout
                .offline
                .iter()
                .copied()
                .filter(|id| id != sender_id)
                .collect();
            fanout.notified = self
                .notifier
                .notify_offline(chat_id, *sender_id, content, &recipients)
                .await;
        }

        debug!(
            chat_id,
            delivered = fanout.delivered.len(),
            failed = fanout.failed.len(),
            offline = fanout.offline.len(),
            notified = fanout.notified,
            "broadcast"
        );
        Ok(fanout)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::OffsetDateTime;

    use super::*;
    use crate::{
        notify::{testing::RecordingPush, NotifierSettings},
        presence::ConnectionHandle,
        store::{
            testing::{group, memory_pool},
            SqliteChatStore, SqliteProfiles,
        },
    };

    async fn setup() -> (
        Broadcaster,
        SqliteChatStore,
        tokio::sync::mpsc::UnboundedReceiver<(UserId, crate::push::Notification)>,
    ) {
        let pool = memory_pool().await;
        let store = SqliteChatStore::new(pool.clone());
        let (push, sent) = RecordingPush::new();
        let notifier = Notifier::spawn(
            Arc::new(store.clone()),
            Arc::new(SqliteProfiles::new(pool)),
            Arc::new(push),
            NotifierSettings::default(),
        );
        let presence = Arc::new(PresenceRegistry::new());
        let broadcaster = Broadcaster::new(Arc::new(store.clone()), presence, notifier);
        (broadcaster, store, sent)
    }

    fn message(sender_id: UserId) -> ServerEvent {
        ServerEvent::Message {
            chat_id: "c1".into(),
            message_id: "m1".into(),
            sender_id,
            content: "hi".into(),
            sent_at: OffsetDateTime::UNIX_EPOCH,
            seq: 1,
        }
    }

    #[tokio::test]
    async fn online_get_frames_offline_get_one_push_sender_none() {
        let (broadcaster, store, mut sent) = setup().await;
        group(&store, "c1", &[1, 2, 3]).await;

        let (x, mut x_rx) = ConnectionHandle::channel(8);
        let (y, mut y_rx) = ConnectionHandle::channel(8);
        broadcaster.presence().register(1, x);
        broadcaster.presence().register(2, y);

        let fanout = broadcaster.broadcast(&message(1), Audience::Everyone).await.unwrap();
        assert_eq!(fanout.delivered, vec![1, 2]);
        assert_eq!(fanout.offline, vec![3]);
        assert_eq!(fanout.notified, 1);

        assert_eq!(y_rx.recv().await.unwrap(), message(1));
        assert_eq!(x_rx.recv().await.unwrap(), message(1));

        let (recipient, _) = sent.recv().await.unwrap();
        assert_eq!(recipient, 3);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_sender_is_never_notified() {
        let (broadcaster, store, mut sent) = setup().await;
        group(&store, "c1", &[1, 2]).await;

        let fanout = broadcaster.broadcast(&message(1), Audience::Everyone).await.unwrap();
        assert_eq!(fanout.offline, vec![1, 2]);
        assert_eq!(fanout.notified, 1);
        assert_eq!(sent.recv().await.unwrap().0, 2);
    }

    #[tokio::test]
    async fn excluded_user_and_failed_delivery_are_isolated() {
        let (broadcaster, store, mut sent) = setup().await;
        group(&store, "c1", &[1, 2, 4]).await;

        let (sender, mut sender_rx) = ConnectionHandle::channel(8);
        let (slow, _slow_rx) = ConnectionHandle::channel(1);
        let (fine, mut fine_rx) = ConnectionHandle::channel(8);
        slow.deliver(message(9)).unwrap();
        broadcaster.presence().register(1, sender);
        broadcaster.presence().register(2, slow);
        broadcaster.presence().register(4, fine);

        let typing = ServerEvent::Typing {
            chat_id: "c1".into(),
            user_id: 1,
            is_typing: true,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        };
        let fanout = broadcaster.broadcast(&typing, Audience::AllBut(1)).await.unwrap();
        assert_eq!(fanout.failed, vec![2]);
        assert_eq!(fanout.delivered, vec![4]);
        assert_eq!(fanout.notified, 0);

        assert_eq!(fine_rx.recv().await.unwrap(), typing);
        assert!(sender_rx.try_recv().is_err());
        assert!(sent.try_recv().is_err());
    }
}
