use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;

use crate::{
    error::{ChatError, ChatResult},
    res::SCHEMA,
    ChatId, UserId,
};

use super::{Chat, ChatStore, Message, MessagePosition, NewChat, ReactionKind, Stamp};

#[derive(Clone)]
pub struct SqliteChatStore {
    db_pool: SqlitePool,
}

#[derive(FromRow)]
struct ChatRow {
    id: String,
    name: Option<String>,
    is_group: bool,
    created_at: OffsetDateTime,
}

/// Order-independent key for the pair of a direct chat.
pub(crate) fn direct_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

impl SqliteChatStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.db_pool
    }

    pub async fn migrate(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA).execute(db_pool).await?;
        Ok(())
    }

    async fn hydrate(&self, row: ChatRow) -> ChatResult<Chat> {
        let participants = self.participants(&row.id).await?;
        Ok(Chat {
            id: row.id,
            name: row.name,
            is_group: row.is_group,
            created_at: row.created_at,
            participants,
        })
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn is_participant(&self, user_id: UserId, chat_id: &str) -> ChatResult<bool> {
        let found: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM chat_participants WHERE chat_id=? AND user_id=?")
                .bind(chat_id)
                .bind(user_id)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(found.is_some())
    }

    async fn participants(&self, chat_id: &str) -> ChatResult<Vec<UserId>> {
        let ids: Vec<UserId> = sqlx::query_scalar(
            "SELECT user_id FROM chat_participants WHERE chat_id=? ORDER BY user_id",
        )
        .bind(chat_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(ids)
    }

    async fn chat(&self, chat_id: &str) -> ChatResult<Option<Chat>> {
        let row: Option<ChatRow> =
            sqlx::query_as("SELECT id,name,is_group,created_at FROM chats WHERE id=?")
                .bind(chat_id)
                .fetch_optional(&self.db_pool)
                .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn chats_for_user(&self, user_id: UserId) -> ChatResult<Vec<Chat>> {
        let rows: Vec<ChatRow> = sqlx::query_as(
            "SELECT c.id,c.name,c.is_group,c.created_at FROM chats c
             JOIN chat_participants p ON p.chat_id=c.id
             WHERE p.user_id=?
             ORDER BY c.created_at DESC, c.id",
        )
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;

        let mut chats = Vec::with_capacity(rows.len());
        for row in rows {
            chats.push(self.hydrate(row).await?);
        }
        Ok(chats)
    }

    async fn create_chat(&self, chat: &NewChat) -> ChatResult<Chat> {
        let mut participants = chat.participants.clone();
        participants.sort_unstable();
        participants.dedup();

        let direct_key = if chat.is_group {
            None
        } else {
            let [a, b] = participants[..] else {
                return Err(ChatError::InvalidChat(
                    "a direct chat needs exactly two distinct participants".to_owned(),
                ));
            };
            Some(direct_key(a, b))
        };

        let created_at = OffsetDateTime::now_utc();
        let mut tx = self.db_pool.begin().await?;

        sqlx::query("INSERT INTO chats (id,name,is_group,direct_key,created_at) VALUES (?,?,?,?,?)")
            .bind(&chat.id)
            .bind(&chat.name)
            .bind(chat.is_group)
            .bind(&direct_key)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

        for user_id in &participants {
            sqlx::query("INSERT INTO chat_participants (chat_id,user_id,joined_at) VALUES (?,?,?)")
                .bind(&chat.id)
                .bind(user_id)
                .bind(created_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(Chat {
            id: chat.id.clone(),
            name: chat.name.clone(),
            is_group: chat.is_group,
            created_at,
            participants,
        })
    }

    async fn find_direct_chat(&self, a: UserId, b: UserId) -> ChatResult<Option<ChatId>> {
        let id: Option<ChatId> =
            sqlx::query_scalar("SELECT id FROM chats WHERE is_group=0 AND direct_key=?")
                .bind(direct_key(a, b))
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(id)
    }

    async fn add_participant(&self, chat_id: &str, user_id: UserId) -> ChatResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO chat_participants (chat_id,user_id,joined_at) VALUES (?,?,?)",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn remove_participant(&self, chat_id: &str, user_id: UserId) -> ChatResult<bool> {
        let result = sqlx::query("DELETE FROM chat_participants WHERE chat_id=? AND user_id=?")
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_message(
        &self,
        id: &str,
        chat_id: &str,
        sender_id: UserId,
        content: &str,
    ) -> ChatResult<Stamp> {
        let at = OffsetDateTime::now_utc();
        // one statement, so sqlite serializes the sequence assignment
        let seq: i64 = sqlx::query_scalar(
            "INSERT INTO messages (id,chat_id,sender_id,content,sent_at,seq)
             SELECT ?,?,?,?,?,COALESCE(MAX(seq),0)+1 FROM messages WHERE chat_id=?
             RETURNING seq",
        )
        .bind(id)
        .bind(chat_id)
        .bind(sender_id)
        .bind(content)
        .bind(at)
        .bind(chat_id)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(Stamp { at, seq })
    }

    async fn messages(&self, chat_id: &str, limit: i64, offset: i64) -> ChatResult<Vec<Message>> {
        let messages: Vec<Message> = sqlx::query_as(
            "SELECT id,chat_id,sender_id,content,sent_at,seq FROM messages
             WHERE chat_id=? ORDER BY seq DESC LIMIT ? OFFSET ?",
        )
        .bind(chat_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(messages)
    }

    async fn message_position(&self, message_id: &str) -> ChatResult<Option<MessagePosition>> {
        let position: Option<MessagePosition> =
            sqlx::query_as("SELECT chat_id,seq FROM messages WHERE id=?")
                .bind(message_id)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(position)
    }

    async fn reaction_catalog(&self) -> ChatResult<Vec<ReactionKind>> {
        let kinds: Vec<ReactionKind> =
            sqlx::query_as("SELECT code,label FROM reaction_catalog ORDER BY rowid")
                .fetch_all(&self.db_pool)
                .await?;
        Ok(kinds)
    }

    async fn insert_reaction(
        &self,
        id: &str,
        message_id: &str,
        user_id: UserId,
        reaction_code: &str,
    ) -> ChatResult<OffsetDateTime> {
        let known: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM reaction_catalog WHERE code=?")
            .bind(reaction_code)
            .fetch_optional(&self.db_pool)
            .await?;
        if known.is_none() {
            return Err(ChatError::UnknownReaction(reaction_code.to_owned()));
        }

        let reacted_at = OffsetDateTime::now_utc();
        sqlx::query(
            "INSERT INTO reactions (id,message_id,user_id,reaction_code,reacted_at)
             VALUES (?,?,?,?,?)",
        )
        .bind(id)
        .bind(message_id)
        .bind(user_id)
        .bind(reaction_code)
        .bind(reacted_at)
        .execute(&self.db_pool)
        .await?;
        Ok(reacted_at)
    }

    async fn remove_reactions(
        &self,
        message_id: &str,
        user_id: UserId,
        reaction_code: &str,
    ) -> ChatResult<u64> {
        let result = sqlx::query(
            "DELETE FROM reactions WHERE message_id=? AND user_id=? AND reaction_code=?",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(reaction_code)
        .execute(&self.db_pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_typing(&self, chat_id: &str, user_id: UserId, is_typing: bool) -> ChatResult<()> {
        sqlx::query(
            "INSERT INTO typing_state (chat_id,user_id,is_typing,updated_at) VALUES (?,?,?,?)
             ON CONFLICT (chat_id,user_id) DO UPDATE SET
                is_typing=excluded.is_typing,
                updated_at=excluded.updated_at",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(is_typing)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn mark_read(
        &self,
        user_id: UserId,
        chat_id: &str,
        seq: i64,
    ) -> ChatResult<OffsetDateTime> {
        let read_at = OffsetDateTime::now_utc();
        sqlx::query(
            "INSERT INTO read_receipts (user_id,chat_id,last_read_seq,read_at) VALUES (?,?,?,?)
             ON CONFLICT (user_id,chat_id) DO UPDATE SET
                last_read_seq=MAX(read_receipts.last_read_seq, excluded.last_read_seq),
                read_at=excluded.read_at",
        )
        .bind(user_id)
        .bind(chat_id)
        .bind(seq)
        .bind(read_at)
        .execute(&self.db_pool)
        .await?;
        Ok(read_at)
    }

    async fn unread_count(&self, user_id: UserId, chat_id: &str) -> ChatResult<i64> {
        let unread: i64 = sqlx::query_scalar(
            "SELECT COALESCE((SELECT MAX(seq) FROM messages WHERE chat_id=?),0)
                  - COALESCE((SELECT last_read_seq FROM read_receipts
                              WHERE user_id=? AND chat_id=?),0)",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(chat_id)
        .fetch_one(&self.db_pool)
        .await?;
        Ok(unread)
    }
}
