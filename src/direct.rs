//! Finds or creates the single direct chat between two users.
//!
//! Two callers racing on the same pair may both miss the lookup and both try
//! to create; the store's uniqueness constraint on the pair lets exactly one
//! win and the loser re-reads the winner's chat.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{ChatError, ChatResult},
    store::{ChatStore, NewChat},
    ChatId, UserId,
};

#[derive(Clone)]
pub struct DirectChats {
    store: Arc<dyn ChatStore>,
}

impl DirectChats {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    pub async fn get_or_create(&self, a: UserId, b: UserId) -> ChatResult<ChatId> {
        if a == b {
            return Err(ChatError::SelfChat);
        }

        if let Some(chat_id) = self.store.find_direct_chat(a, b).await? {
            return Ok(chat_id);
        }

        self.create_or_reread(a, b).await
    }

    pub(crate) async fn create_or_reread(&self, a: UserId, b: UserId) -> ChatResult<ChatId> {
        let chat = NewChat {
            id: Uuid::now_v7().to_string(),
            name: None,
            is_group: false,
            participants: vec![a, b],
        };

        match self.store.create_chat(&chat).await {
            Ok(created) => {
                info!(chat_id = %created.id, a, b, "direct chat created");
                Ok(created.id)
            }
            Err(ChatError::DuplicateId) => {
                debug!(a, b, "lost direct chat creation race");
                self.store.find_direct_chat(a, b).await?.ok_or(ChatError::NotFound)
            }
            Err(err) => Err(err),
        }
    }
}
