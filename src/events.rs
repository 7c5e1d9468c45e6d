//! Real-time frames. Every frame is a JSON object whose `type` field selects
//! the variant; both directions share the same type names.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{ChatId, UserId};

/// Frames a client may send over its connection.
///
/// Server-stamped fields (`sender_id`, `sent_at`, ...) are ignored if a client
/// includes them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Message {
        chat_id: ChatId,
        message_id: String,
        content: String,
    },
    Reaction {
        chat_id: ChatId,
        reaction_id: String,
        message_id: String,
        reaction_code: String,
    },
    ReactionRemoved {
        chat_id: ChatId,
        message_id: String,
        reaction_code: String,
    },
    Typing {
        chat_id: ChatId,
        is_typing: bool,
    },
    ReadReceipt {
        chat_id: ChatId,
        message_id: String,
    },
}

impl ClientEvent {
    pub fn chat_id(&self) -> &str {
        match self {
            ClientEvent::Message { chat_id, .. }
            | ClientEvent::Reaction { chat_id, .. }
            | ClientEvent::ReactionRemoved { chat_id, .. }
            | ClientEvent::Typing { chat_id, .. }
            | ClientEvent::ReadReceipt { chat_id, .. } => chat_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Message { .. } => "message",
            ClientEvent::Reaction { .. } => "reaction",
            ClientEvent::ReactionRemoved { .. } => "reaction_removed",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::ReadReceipt { .. } => "read_receipt",
        }
    }
}

/// Frames fanned out to chat participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Message {
        chat_id: ChatId,
        message_id: String,
        sender_id: UserId,
        content: String,
        #[serde(with = "time::serde::rfc3339")]
        sent_at: OffsetDateTime,
        seq: i64,
    },
    Reaction {
        chat_id: ChatId,
        reaction_id: String,
        message_id: String,
        user_id: UserId,
        reaction_code: String,
        #[serde(with = "time::serde::rfc3339")]
        reacted_at: OffsetDateTime,
    },
    ReactionRemoved {
        chat_id: ChatId,
        message_id: String,
        user_id: UserId,
        reaction_code: String,
        #[serde(with = "time::serde::rfc3339")]
        removed_at: OffsetDateTime,
    },
    Typing {
        chat_id: ChatId,
        user_id: UserId,
        is_typing: bool,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    ReadReceipt {
        chat_id: ChatId,
        user_id: UserId,
        message_id: String,
        #[serde(with = "time::serde::rfc3339")]
        read_at: OffsetDateTime,
    },
}

impl ServerEvent {
    pub fn chat_id(&self) -> &str {
        match self {
            ServerEvent::Message { chat_id, .. }
            | ServerEvent::Reaction { chat_id, .. }
            | ServerEvent::ReactionRemoved { chat_id, .. }
            | ServerEvent::Typing { chat_id, .. }
            | ServerEvent::ReadReceipt { chat_id, .. } => chat_id,
        }
    }
}

/// Why an inbound frame could not be turned into a [`ClientEvent`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not a JSON object with a string `type`")]
    Untyped,

    #[error("unknown frame type {0:?}")]
    UnknownType(String),

    #[error("malformed {kind} frame: {source}")]
    Malformed {
        kind: String,
        source: serde_json::Error,
    },
}

const KNOWN_TYPES: [&str; 5] = [
    "message",
    "reaction",
    "reaction_removed",
    "typing",
    "read_receipt",
];

/// Reads the declared `type` first so unknown kinds and broken payloads of a
/// known kind are reported differently.
pub fn decode_frame(raw: &[u8]) -> Result<ClientEvent, FrameError> {
    let value: serde_json::Value = serde_json::from_slice(raw).map_err(|_| FrameError::Untyped)?;
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(FrameError::Untyped)?
        .to_owned();

    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(FrameError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|source| FrameError::Malformed { kind, source })
}
