use thiserror::Error;

/// Failure kinds shared by the chat store, the service layer and both
/// delivery surfaces. Callers branch on the variant, never on the message.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("not found")]
    NotFound,

    #[error("not a participant of this chat")]
    Forbidden,

    #[error("an entry with this id already exists")]
    DuplicateId,

    #[error("cannot open a direct chat with yourself")]
    SelfChat,

    #[error("unknown reaction code {0:?}")]
    UnknownReaction(String),

    #[error("invalid chat: {0}")]
    InvalidChat(String),

    #[error("missing or invalid user identity")]
    Unauthenticated,

    #[error("store error: {0}")]
    Store(sqlx::Error),
}

#[cfg(test)]
impl ChatError {
    pub(crate) fn is_duplicate(&self) -> bool {
        matches!(self, ChatError::DuplicateId)
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => ChatError::DuplicateId,
            sqlx::Error::RowNotFound => ChatError::NotFound,
            _ => ChatError::Store(err),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
