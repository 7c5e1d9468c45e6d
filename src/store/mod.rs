//! Durable chat state. The service layer only talks to [`ChatStore`]; the
//! SQLite implementation lives in [`sqlite`].

mod profiles;
mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{error::ChatResult, ChatId, UserId};

pub use profiles::{Profile, ProfileDirectory, SqliteProfiles};
pub use sqlite::SqliteChatStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chat {
    pub id: ChatId,
    pub name: Option<String>,
    pub is_group: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub participants: Vec<UserId>,
}

#[derive(Debug, Clone)]
pub struct NewChat {
    pub id: ChatId,
    pub name: Option<String>,
    pub is_group: bool,
    pub participants: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Message {
    pub id: String,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
    pub seq: i64,
}

/// What the store assigned to a freshly inserted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub at: OffsetDateTime,
    pub seq: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct MessagePosition {
    pub chat_id: ChatId,
    pub seq: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct ReactionKind {
    pub code: String,
    pub label: String,
}

/// Every insert keyed by a caller-supplied id reports a reused id as
/// [`ChatError::DuplicateId`](crate::error::ChatError::DuplicateId) and leaves
/// the stored row untouched.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn is_participant(&self, user_id: UserId, chat_id: &str) -> ChatResult<bool>;

    async fn participants(&self, chat_id: &str) -> ChatResult<Vec<UserId>>;

    async fn chat(&self, chat_id: &str) -> ChatResult<Option<Chat>>;

    async fn chats_for_user(&self, user_id: UserId) -> ChatResult<Vec<Chat>>;

    /// Non-group chats must name exactly two distinct users; at most one such
    /// chat exists per pair.
    async fn create_chat(&self, chat: &NewChat) -> ChatResult<Chat>;

    async fn find_direct_chat(&self, a: UserId, b: UserId) -> ChatResult<Option<ChatId>>;

    async fn add_participant(&self, chat_id: &str, user_id: UserId) -> ChatResult<()>;

    async fn remove_participant(&self, chat_id: &str, user_id: UserId) -> ChatResult<bool>;

    async fn insert_message(
        &self,
        id: &str,
        chat_id: &str,
        sender_id: UserId,
        content: &str,
    ) -> ChatResult<Stamp>;

    /// Newest first.
    async fn messages(&self, chat_id: &str, limit: i64, offset: i64) -> ChatResult<Vec<Message>>;

    async fn message_position(&self, message_id: &str) -> ChatResult<Option<MessagePosition>>;

    async fn reaction_catalog(&self) -> ChatResult<Vec<ReactionKind>>;

    async fn insert_reaction(
        &self,
        id: &str,
        message_id: &str,
        user_id: UserId,
        reaction_code: &str,
    ) -> ChatResult<OffsetDateTime>;

    /// Removes every reaction with this code from this user on this message.
    async fn remove_reactions(
        &self,
        message_id: &str,
        user_id: UserId,
        reaction_code: &str,
    ) -> ChatResult<u64>;

    async fn set_typing(&self, chat_id: &str, user_id: UserId, is_typing: bool) -> ChatResult<()>;

    /// Raises the user's read high-water mark for the chat; never lowers it.
    async fn mark_read(&self, user_id: UserId, chat_id: &str, seq: i64)
        -> ChatResult<OffsetDateTime>;

    async fn unread_count(&self, user_id: UserId, chat_id: &str) -> ChatResult<i64>;
}

#[cfg(test)]
pub(crate) mod testing {
    use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

    use super::*;

    pub(crate) async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect sqlite");
        SqliteChatStore::migrate(&pool).await.expect("apply schema");
        pool
    }

    pub(crate) async fn memory_store() -> SqliteChatStore {
        SqliteChatStore::new(memory_pool().await)
    }

    pub(crate) async fn group(store: &SqliteChatStore, id: &str, participants: &[UserId]) -> Chat {
        store
            .create_chat(&NewChat {
                id: id.to_owned(),
                name: Some(format!("{id} crew")),
                is_group: true,
                participants: participants.to_vec(),
            })
            .await
            .expect("create group")
    }
}
