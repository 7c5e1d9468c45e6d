use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::UserId;

use super::{DeviceTokens, Notification, PushError, PushSender};

#[derive(Serialize)]
struct GatewayRequest<'a> {
    token: &'a str,
    #[serde(flatten)]
    notification: &'a Notification,
}

/// Posts one request per device token to an HTTP push relay
/// (`POST {base_url}/send`). Tokens the relay answers with 404 or 410 are
/// dropped from the registry.
#[derive(Clone)]
pub struct GatewayPush {
    http_client: reqwest::Client,
    base_url: String,
    tokens: DeviceTokens,
}

impl GatewayPush {
    pub fn new(http_client: reqwest::Client, base_url: &str, tokens: DeviceTokens) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            tokens,
        }
    }
}

#[async_trait]
impl PushSender for GatewayPush {
    async fn send_notification(
        &self,
        user_id: UserId,
        notification: &Notification,
    ) -> Result<(), PushError> {
        let tokens = self.tokens.list(user_id).await?;
        if tokens.is_empty() {
            debug!(user_id, "no device tokens registered");
            return Ok(());
        }

        let url = format!("{}/send", self.base_url);
        let mut failed = 0;
        for token in &tokens {
            let response = self
                .http_client
                .post(&url)
                .json(&GatewayRequest { token, notification })
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => {}
                Ok(response)
                    if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::GONE) =>
                {
                    failed += 1;
                    if let Err(err) = self.tokens.unregister(user_id, token).await {
                        warn!(user_id, %err, "could not drop invalid device token");
                    } else {
                        info!(user_id, "dropped invalid device token");
                    }
                }
                Ok(response) => {
                    failed += 1;
                    warn!(
                        user_id,
                        status = %response.status(),
                        "push gateway rejected notification"
                    );
                }
                Err(err) => {
                    failed += 1;
                    warn!(user_id, %err, "push gateway request failed");
                }
            }
        }

        if failed == tokens.len() {
            return Err(PushError::Undelivered { failed, total: tokens.len() });
        }
        Ok(())
    }
}

/// Used when no gateway is configured: records what would have been sent.
#[derive(Clone, Default)]
pub struct LogPush;

#[async_trait]
impl PushSender for LogPush {
    async fn send_notification(
        &self,
        user_id: UserId,
        notification: &Notification,
    ) -> Result<(), PushError> {
        info!(user_id, title = %notification.title, "push notification (no gateway configured)");
        Ok(())
    }
}
