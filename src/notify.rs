//! Offline fallback: turns a chat message into push notifications for the
//! participants that had no live connection when it was broadcast.
//!
//! Deliveries run on a fixed pool of workers fed by a bounded queue, each one
//! capped by a timeout. When the queue is full new jobs are shed and logged.

use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::{
    push::{Notification, PushSender},
    store::{ChatStore, ProfileDirectory},
    ChatId, UserId,
};

const PREVIEW_CHARS: usize = 140;

#[derive(Debug, Clone, Copy)]
pub struct NotifierSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub timeout: Duration,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 1024,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct PushJob {
    recipient: UserId,
    chat_id: ChatId,
    notification: Notification,
}

#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn ChatStore>,
    profiles: Arc<dyn ProfileDirectory>,
    queue: mpsc::Sender<PushJob>,
}

impl Notifier {
    /// Starts the worker pool. Must be called inside a tokio runtime.
    pub fn spawn(
        store: Arc<dyn ChatStore>,
        profiles: Arc<dyn ProfileDirectory>,
        push: Arc<dyn PushSender>,
        settings: NotifierSettings,
    ) -> Self {
        let (queue, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..settings.workers.max(1) {
            tokio::spawn(run_worker(
                worker,
                rx.clone(),
                push.clone(),
                store.clone(),
                settings.timeout,
            ));
        }

        Self { store, profiles, queue }
    }

    /// Queues one notification per offline recipient and returns how many
    /// were queued. Never waits on delivery.
    pub async fn notify_offline(
        &self,
        chat_id: &str,
        sender_id: UserId,
        content: &str,
        offline: &[UserId],
    ) -> usize {
        if offline.is_empty() {
            return 0;
        }

        let notification = self.compose(chat_id, sender_id, content).await;

        let mut queued = 0;
        for &recipient in offline {
            let job = PushJob {
                recipient,
                chat_id: chat_id.to_owned(),
                notification: notification.clone(),
            };
            match self.queue.try_send(job) {
                Ok(()) => queued += 1,
                Err(err) => warn!(recipient, chat_id, %err, "push job shed"),
            }
        }
        queued
    }

    async fn compose(&self, chat_id: &str, sender_id: UserId, content: &str) -> Notification {
        let profile = match self.profiles.get(sender_id).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(sender_id, %err, "sender profile lookup failed");
                None
            }
        };
        let chat = match self.store.chat(chat_id).await {
            Ok(chat) => chat,
            Err(err) => {
                warn!(chat_id, %err, "chat lookup failed");
                None
            }
        };

        let sender_name = profile
            .as_ref()
            .map(|p| p.display_name.as_str())
            .unwrap_or("Someone");
        let title = match chat.as_ref().filter(|c| c.is_group).and_then(|c| c.name.as_deref()) {
            Some(chat_name) => format!("{sender_name} in {chat_name}"),
            None => sender_name.to_owned(),
        };

        Notification {
            title,
            body: preview(content),
            sound: "default".to_owned(),
            badge: None,
            image_url: profile.and_then(|p| p.avatar_url),
        }
    }
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let mut body: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        body.push('…');
    }
    body
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<PushJob>>>,
    push: Arc<dyn PushSender>,
    store: Arc<dyn ChatStore>,
    timeout: Duration,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            debug!(worker, "push queue closed");
            break;
        };
        deliver(job, push.as_ref(), store.as_ref(), timeout).await;
    }
}

async fn deliver(
    mut job: PushJob,
    push: &dyn PushSender,
    store: &dyn ChatStore,
    timeout: Duration,
) {
    let recipient = job.recipient;
    let outcome = tokio::time::timeout(timeout, async {
        match store.unread_count(recipient, &job.chat_id).await {
            Ok(unread) if unread > 0 => job.notification.badge = Some(unread),
            Ok(_) => {}
            Err(err) => debug!(recipient, %err, "badge lookup failed"),
        }
        push.send_notification(recipient, &job.notification).await
    })
    .await;

    match outcome {
        Ok(Ok(())) => debug!(recipient, chat_id = %job.chat_id, "push delivered"),
        Ok(Err(err)) => warn!(recipient, chat_id = %job.chat_id, %err, "push delivery failed"),
        Err(_) => warn!(recipient, chat_id = %job.chat_id, ?timeout, "push delivery timed out"),
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{testing::RecordingPush, *};
    use crate::store::{
        testing::{group, memory_pool},
        NewChat, Profile, SqliteChatStore, SqliteProfiles,
    };

    async fn setup(push: RecordingPush, timeout: Duration) -> (Notifier, SqliteChatStore) {
        let settings = NotifierSettings {
            workers: 2,
            queue_capacity: 16,
            timeout,
        };
        setup_with(push, settings).await
    }

    async fn setup_with(
        push: RecordingPush,
        settings: NotifierSettings,
    ) -> (Notifier, SqliteChatStore) {
        let pool = memory_pool().await;
        let store = SqliteChatStore::new(pool.clone());
        let profiles = SqliteProfiles::new(pool);
        profiles
            .upsert(&Profile {
                user_id: 1,
                display_name: "Ada".into(),
                avatar_url: Some("https://cdn.example/ada.png".into()),
            })
            .await
            .unwrap();

        let notifier = Notifier::spawn(
            Arc::new(store.clone()),
            Arc::new(profiles),
            Arc::new(push),
            settings,
        );
        (notifier, store)
    }

    #[tokio::test]
    async fn group_title_badge_and_avatar() {
        let (push, mut sent) = RecordingPush::new();
        let (notifier, store) = setup(push, Duration::from_secs(5)).await;
        group(&store, "c1", &[1, 2]).await;
        store.insert_message("m1", "c1", 1, "hi").await.unwrap();

        assert_eq!(notifier.notify_offline("c1", 1, "hi", &[2]).await, 1);

        let (recipient, notification) = sent.recv().await.unwrap();
        assert_eq!(recipient, 2);
        assert_eq!(notification.title, "Ada in c1 crew");
        assert_eq!(notification.body, "hi");
        assert_eq!(notification.badge, Some(1));
        assert_eq!(notification.image_url.as_deref(), Some("https://cdn.example/ada.png"));
    }

    #[tokio::test]
    async fn direct_chat_title_is_sender_name() {
        let (push, mut sent) = RecordingPush::new();
        let (notifier, store) = setup(push, Duration::from_secs(5)).await;
        store
            .create_chat(&NewChat {
                id: "d1".into(),
                name: Some("ignored".into()),
                is_group: false,
                participants: vec![1, 5],
            })
            .await
            .unwrap();

        notifier.notify_offline("d1", 1, "hey", &[5]).await;
        assert_eq!(sent.recv().await.unwrap().1.title, "Ada");

        notifier.notify_offline("d1", 5, "back", &[1]).await;
        assert_eq!(sent.recv().await.unwrap().1.title, "Someone");
    }

    #[tokio::test]
    async fn stalled_recipient_does_not_hold_up_others() {
        let (mut push, mut sent) = RecordingPush::new();
        push.stall.insert(2);
        let (notifier, store) = setup(push, Duration::from_millis(50)).await;
        group(&store, "c1", &[1, 2, 3]).await;

        assert_eq!(notifier.notify_offline("c1", 1, "hi", &[2, 3]).await, 2);
        let (recipient, _) = tokio::time::timeout(Duration::from_secs(2), sent.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recipient, 3);
    }

    #[tokio::test]
    async fn full_queue_sheds_jobs() {
        let (mut push, mut sent) = RecordingPush::new();
        push.stall.extend([3, 4, 5]);
        let settings = NotifierSettings {
            workers: 1,
            queue_capacity: 1,
            timeout: Duration::from_secs(60),
        };
        let (notifier, store) = setup_with(push, settings).await;
        group(&store, "c1", &[1, 3, 4, 5]).await;

        assert_eq!(notifier.notify_offline("c1", 1, "hi", &[3, 4, 5]).await, 1);

        // the lone worker takes the queued job and stalls on it
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(notifier.notify_offline("c1", 1, "again", &[4, 5]).await, 1);
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_offline_set_sends_nothing() {
        let (push, mut sent) = RecordingPush::new();
        let (notifier, _store) = setup(push, Duration::from_secs(5)).await;
        assert_eq!(notifier.notify_offline("c1", 1, "hi", &[]).await, 0);
        assert!(sent.try_recv().is_err());
    }

    #[test]
    fn long_messages_are_truncated_on_char_boundaries() {
        let long = "é".repeat(200);
        let body = preview(&long);
        assert_eq!(body.chars().count(), PREVIEW_CHARS + 1);
        assert!(body.ends_with('…'));
        assert_eq!(preview("short"), "short");
    }
}
