//! Push delivery for participants without a live connection.

mod gateway;
mod tokens;

use async_trait::async_trait;
use serde::Serialize;

use crate::UserId;

pub use gateway::{GatewayPush, LogPush};
pub use tokens::DeviceTokens;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub sound: String,
    pub badge: Option<i64>,
    pub image_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push gateway unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("device tokens unavailable: {0}")]
    Tokens(#[from] sqlx::Error),

    #[error("{failed} of {total} device tokens rejected the notification")]
    Undelivered { failed: usize, total: usize },
}

/// Delivers one notification to every device a user registered.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send_notification(
        &self,
        user_id: UserId,
        notification: &Notification,
    ) -> Result<(), PushError>;
}
