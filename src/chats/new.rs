use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, http::StatusCode, Json};
use serde::Deserialize;

use crate::{session::CurrentUser, store::Chat, AppResult, ChatId, UserId};

use super::service::{ChatService, CreateChat};

#[derive(Debug, Deserialize)]
pub(crate) struct NewChatQuery {
    id: Option<ChatId>,
    name: Option<String>,
    #[serde(default)]
    is_group: bool,
    #[serde(default)]
    participants: Vec<UserId>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn create_chat(
    CurrentUser(user_id): CurrentUser,
    State(chats): State<Arc<ChatService>>,

    Json(NewChatQuery { id, name, is_group, participants }): Json<NewChatQuery>,
) -> AppResult<(StatusCode, Json<Chat>)> {
    let chat = chats
        .create_chat(user_id, CreateChat { id, name, is_group, participants })
        .await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list_chats(
    CurrentUser(user_id): CurrentUser,
    State(chats): State<Arc<ChatService>>,
) -> AppResult<Json<Vec<Chat>>> {
    Ok(Json(chats.chats(user_id).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn chat(
    CurrentUser(user_id): CurrentUser,
    State(chats): State<Arc<ChatService>>,
    Path(chat_id): Path<ChatId>,
) -> AppResult<Json<Chat>> {
    Ok(Json(chats.chat(user_id, &chat_id).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn direct_chat(
    CurrentUser(user_id): CurrentUser,
    State(chats): State<Arc<ChatService>>,
    Path(other): Path<UserId>,
) -> AppResult<Json<Chat>> {
    Ok(Json(chats.direct_chat(user_id, other).await?))
}
