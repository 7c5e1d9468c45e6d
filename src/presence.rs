//! Presence registry: who currently has a live connection, and how to reach it.
//!
//! One binding per user. A second connection from the same user replaces the
//! first binding without closing the older connection; only the newest
//! connection receives broadcasts.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{events::ServerEvent, UserId};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound buffer full")]
    Backpressure,

    #[error("connection closed")]
    Closed,
}

/// Sending half of one live connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// Creates a handle plus the receiver its writer task drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { id: Uuid::now_v7(), tx }, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Never waits: a slow consumer gets `Backpressure` instead of stalling
    /// the caller.
    pub fn deliver(&self, event: ServerEvent) -> Result<(), DeliveryError> {
        self.tx.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    connections: DashMap<UserId, ConnectionHandle>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `user_id` to `connection`, returning the binding it replaced.
    pub fn register(
        &self,
        user_id: UserId,
        connection: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        self.connections.insert(user_id, connection)
    }

    pub fn unregister(&self, user_id: UserId) {
        self.connections.remove(&user_id);
    }

    /// Removes the binding only while it still points at `connection_id`.
    /// Returns whether anything was removed.
    pub fn unregister_connection(&self, user_id: UserId, connection_id: Uuid) -> bool {
        self.connections
            .remove_if(&user_id, |_, handle| handle.id == connection_id)
            .is_some()
    }

    pub fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.connections.get(&user_id).map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self) -> HashSet<UserId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;

    fn typing(user_id: UserId) -> ServerEvent {
        ServerEvent::Typing {
            chat_id: "c1".into(),
            user_id,
            is_typing: true,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn register_lookup_and_deliver() {
        let registry = PresenceRegistry::new();
        let (handle, mut rx) = ConnectionHandle::channel(4);
        registry.register(1, handle);

        registry.lookup(1).unwrap().deliver(typing(1)).unwrap();
        assert_eq!(rx.recv().await.unwrap(), typing(1));
        assert!(registry.lookup(2).is_none());
        assert_eq!(registry.snapshot(), HashSet::from([1]));
    }

    #[tokio::test]
    async fn reconnect_replaces_binding() {
        let registry = PresenceRegistry::new();
        let (old, mut old_rx) = ConnectionHandle::channel(4);
        let (new, mut new_rx) = ConnectionHandle::channel(4);
        let old_id = old.id();

        registry.register(7, old);
        let replaced = registry.register(7, new);
        assert_eq!(replaced.map(|h| h.id()), Some(old_id));
        assert_eq!(registry.len(), 1);

        registry.lookup(7).unwrap().deliver(typing(7)).unwrap();
        assert_eq!(new_rx.recv().await.unwrap(), typing(7));
        assert!(old_rx.try_recv().is_err());

        // the stale connection closing must not evict the newer one
        assert!(!registry.unregister_connection(7, old_id));
        assert!(registry.lookup(7).is_some());
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = PresenceRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel(1);
        registry.register(3, handle);

        registry.unregister(3);
        registry.unregister(3);
        registry.unregister(42);
        assert!(registry.is_empty());
    }

    #[test]
    fn full_or_closed_buffers_are_reported() {
        let (handle, rx) = ConnectionHandle::channel(1);
        handle.deliver(typing(1)).unwrap();
        assert_eq!(handle.deliver(typing(1)), Err(DeliveryError::Backpressure));

        drop(rx);
        assert_eq!(handle.deliver(typing(1)), Err(DeliveryError::Closed));
    }
}
