//! Chat operations shared by the websocket router and the HTTP handlers, so
//! both surfaces produce the same store writes and the same fan-out.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    broadcast::{Audience, Broadcaster, Fanout},
    direct::DirectChats,
    error::{ChatError, ChatResult},
    events::ServerEvent,
    presence::PresenceRegistry,
    store::{Chat, ChatStore, Message, NewChat, ReactionKind},
    ChatId, UserId,
};

pub const DEFAULT_PAGE: i64 = 50;
pub const MAX_PAGE: i64 = 200;

/// Result of an idempotency-keyed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Posted {
    Sent { event: ServerEvent, fanout: Fanout },
    /// The id was already used; nothing was stored or broadcast.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct CreateChat {
    pub id: Option<ChatId>,
    pub name: Option<String>,
    pub is_group: bool,
    pub participants: Vec<UserId>,
}

pub struct ChatService {
    store: Arc<dyn ChatStore>,
    broadcaster: Broadcaster,
    direct: DirectChats,
}

impl ChatService {
    pub fn new(store: Arc<dyn ChatStore>, broadcaster: Broadcaster) -> Self {
        let direct = DirectChats::new(store.clone());
        Self { store, broadcaster, direct }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        self.broadcaster.presence()
    }

    /// Membership is always checked against the store, never presence.
    pub async fn authorize(&self, user_id: UserId, chat_id: &str) -> ChatResult<()> {
        if self.store.is_participant(user_id, chat_id).await? {
            Ok(())
        } else {
            Err(ChatError::Forbidden)
        }
    }

    /// A store failure after the write succeeded is logged; the write stands.
    async fn fan_out(&self, event: &ServerEvent, audience: Audience) -> Fanout {
        match self.broadcaster.broadcast(event, audience).await {
            Ok(fanout) => fanout,
            Err(err) => {
                warn!(chat_id = event.chat_id(), %err, "broadcast failed");
                Fanout::default()
            }
        }
    }

    pub async fn send_message(
        &self,
        user_id: UserId,
        chat_id: &str,
        message_id: &str,
        content: &str,
    ) -> ChatResult<Posted> {
        self.authorize(user_id, chat_id).await?;

        let stamp = match self.store.insert_message(message_id, chat_id, user_id, content).await {
            Ok(stamp) => stamp,
            Err(ChatError::DuplicateId) => return Ok(Posted::Duplicate),
            Err(err) => return Err(err),
        };

        let event = ServerEvent::Message {
            chat_id: chat_id.to_owned(),
            message_id: message_id.to_owned(),
            sender_id: user_id,
            content: content.to_owned(),
            sent_at: stamp.at,
            seq: stamp.seq,
        };
        let fanout = self.fan_out(&event, Audience::Everyone).await;
        Ok(Posted::Sent { event, fanout })
    }

    pub async fn add_reaction(
        &self,
        user_id: UserId,
        message_id: &str,
        reaction_id: &str,
        reaction_code: &str,
    ) -> ChatResult<Posted> {
        let position = self
            .store
            .message_position(message_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        self.authorize(user_id, &position.chat_id).await?;

        let reacted_at = match self
            .store
            .insert_reaction(reaction_id, message_id, user_id, reaction_code)
            .await
        {
            Ok(at) => at,
            Err(ChatError::DuplicateId) => return Ok(Posted::Duplicate),
            Err(err) => return Err(err),
        };

        let event = ServerEvent::Reaction {
            chat_id: position.chat_id,
            reaction_id: reaction_id.to_owned(),
            message_id: message_id.to_owned(),
            user_id,
            reaction_code: reaction_code.to_owned(),
            reacted_at,
        };
        let fanout = self.fan_out(&event, Audience::Everyone).await;
        Ok(Posted::Sent { event, fanout })
    }

    /// Removing a reaction that does not exist still broadcasts the removal.
    pub async fn remove_reaction(
        &self,
        user_id: UserId,
        message_id: &str,
        reaction_code: &str,
    ) -> ChatResult<Fanout> {
        let position = self
            .store
            .message_position(message_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        self.authorize(user_id, &position.chat_id).await?;

        self.store.remove_reactions(message_id, user_id, reaction_code).await?;

        let event = ServerEvent::ReactionRemoved {
            chat_id: position.chat_id,
            message_id: message_id.to_owned(),
            user_id,
            reaction_code: reaction_code.to_owned(),
            removed_at: OffsetDateTime::now_utc(),
        };
        Ok(self.fan_out(&event, Audience::Everyone).await)
    }

    pub async fn typing(
        &self,
        user_id: UserId,
        chat_id: &str,
        is_typing: bool,
    ) -> ChatResult<Fanout> {
        self.authorize(user_id, chat_id).await?;

        if let Err(err) = self.store.set_typing(chat_id, user_id, is_typing).await {
            warn!(user_id, chat_id, %err, "typing state not saved");
        }

        let event = ServerEvent::Typing {
            chat_id: chat_id.to_owned(),
            user_id,
            is_typing,
            timestamp: OffsetDateTime::now_utc(),
        };
        Ok(self.fan_out(&event, Audience::AllBut(user_id)).await)
    }

    pub async fn mark_read(
        &self,
        user_id: UserId,
        chat_id: &str,
        message_id: &str,
    ) -> ChatResult<Fanout> {
        self.authorize(user_id, chat_id).await?;

        let position = self
            .store
            .message_position(message_id)
            .await?
            .filter(|position| position.chat_id == chat_id)
            .ok_or(ChatError::NotFound)?;
        let read_at = self.store.mark_read(user_id, chat_id, position.seq).await?;

        let event = ServerEvent::ReadReceipt {
            chat_id: chat_id.to_owned(),
            user_id,
            message_id: message_id.to_owned(),
            read_at,
        };
        Ok(self.fan_out(&event, Audience::AllBut(user_id)).await)
    }

    /// The creator is always a participant. Non-group chats resolve to the
    /// one direct chat of the pair.
    pub async fn create_chat(&self, user_id: UserId, request: CreateChat) -> ChatResult<Chat> {
        let mut participants = request.participants;
        participants.push(user_id);
        participants.sort_unstable();
        participants.dedup();

        if !request.is_group {
            let others: Vec<UserId> =
                participants.iter().copied().filter(|&id| id != user_id).collect();
            let chat_id = match others[..] {
                [] => return Err(ChatError::SelfChat),
                [other] => self.direct.get_or_create(user_id, other).await?,
                _ => {
                    return Err(ChatError::InvalidChat(
                        "a direct chat has exactly one other participant".to_owned(),
                    ));
                }
            };
            return self.store.chat(&chat_id).await?.ok_or(ChatError::NotFound);
        }

        let chat = self
            .store
            .create_chat(&NewChat {
                id: request.id.unwrap_or_else(|| Uuid::now_v7().to_string()),
                name: request.name,
                is_group: true,
                participants,
            })
            .await?;
        info!(chat_id = %chat.id, user_id, members = chat.participants.len(), "group chat created");
        Ok(chat)
    }

    pub async fn direct_chat(&self, user_id: UserId, other: UserId) -> ChatResult<Chat> {
        let chat_id = self.direct.get_or_create(user_id, other).await?;
        self.store.chat(&chat_id).await?.ok_or(ChatError::NotFound)
    }

    pub async fn chat(&self, user_id: UserId, chat_id: &str) -> ChatResult<Chat> {
        self.authorize(user_id, chat_id).await?;
        self.store.chat(chat_id).await?.ok_or(ChatError::NotFound)
    }

    pub async fn chats(&self, user_id: UserId) -> ChatResult<Vec<Chat>> {
        self.store.chats_for_user(user_id).await
    }

    pub async fn messages(
        &self,
        user_id: UserId,
        chat_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ChatResult<Vec<Message>> {
        self.authorize(user_id, chat_id).await?;
        let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        let offset = offset.unwrap_or(0).max(0);
        self.store.messages(chat_id, limit, offset).await
    }

    async fn group(&self, user_id: UserId, chat_id: &str) -> ChatResult<Chat> {
        let chat = self.chat(user_id, chat_id).await?;
        if !chat.is_group {
            return Err(ChatError::InvalidChat(
                "direct chats have a fixed pair of participants".to_owned(),
            ));
        }
        Ok(chat)
    }

    pub async fn add_participant(
        &self,
        user_id: UserId,
        chat_id: &str,
        new_member: UserId,
    ) -> ChatResult<()> {
        self.group(user_id, chat_id).await?;
        self.store.add_participant(chat_id, new_member).await?;
        info!(chat_id, user_id, new_member, "participant added");
        Ok(())
    }

    pub async fn remove_participant(
        &self,
        user_id: UserId,
        chat_id: &str,
        member: UserId,
    ) -> ChatResult<()> {
        self.group(user_id, chat_id).await?;
        if !self.store.remove_participant(chat_id, member).await? {
            return Err(ChatError::NotFound);
        }
        info!(chat_id, user_id, member, "participant removed");
        Ok(())
    }

    /// Participants of the chat that currently hold a live connection.
    pub async fn online(&self, user_id: UserId, chat_id: &str) -> ChatResult<Vec<UserId>> {
        let chat = self.chat(user_id, chat_id).await?;
        let present = self.presence().snapshot();
        Ok(chat
            .participants
            .into_iter()
            .filter(|id| present.contains(id))
            .collect())
    }

    pub async fn reaction_catalog(&self) -> ChatResult<Vec<ReactionKind>> {
        self.store.reaction_catalog().await
    }
}
