use std::sync::Arc;

use axum::{debug_handler, extract::{Path, Query, State}, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{events::ServerEvent, session::CurrentUser, store::Message, AppResult, ChatId};

use super::service::{ChatService, Posted};

#[derive(Deserialize)]
pub(crate) struct SendMessageQuery {
    message_id: String,
    content: String,
}

#[derive(Deserialize)]
pub(crate) struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SendMessageResponse {
    message_id: String,
    duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    sent_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seq: Option<i64>,
    delivered: usize,
    notified: usize,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn send_message(
    CurrentUser(user_id): CurrentUser,
    State(chats): State<Arc<ChatService>>,
    Path(chat_id): Path<ChatId>,

    Json(SendMessageQuery { message_id, content }): Json<SendMessageQuery>,
) -> AppResult<(StatusCode, Json<SendMessageResponse>)> {
    let posted = chats.send_message(user_id, &chat_id, &message_id, &content).await?;

    let response = match posted {
        Posted::Sent {
            event: ServerEvent::Message { sent_at, seq, .. },
            fanout,
        } => (
            StatusCode::CREATED,
            SendMessageResponse {
                message_id,
                duplicate: false,
                sent_at: Some(sent_at),
                seq: Some(seq),
                delivered: fanout.delivered.len(),
                notified: fanout.notified,
            },
        ),
        Posted::Sent { .. } => return Err("message send produced a non-message event".into()),
        Posted::Duplicate => (
            StatusCode::OK,
            SendMessageResponse {
                message_id,
                duplicate: true,
                sent_at: None,
                seq: None,
                delivered: 0,
                notified: 0,
            },
        ),
    };
    Ok((response.0, Json(response.1)))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list_messages(
    CurrentUser(user_id): CurrentUser,
    State(chats): State<Arc<ChatService>>,
    Path(chat_id): Path<ChatId>,
    Query(PageQuery { limit, offset }): Query<PageQuery>,
) -> AppResult<Json<Vec<Message>>> {
    Ok(Json(chats.messages(user_id, &chat_id, limit, offset).await?))
}
