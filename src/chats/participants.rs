use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, http::StatusCode, Json};
use serde::Deserialize;

use crate::{session::CurrentUser, AppResult, ChatId, UserId};

use super::service::ChatService;

#[derive(Deserialize)]
pub(crate) struct AddParticipantQuery {
    user_id: UserId,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn add_participant(
    CurrentUser(user_id): CurrentUser,
    State(chats): State<Arc<ChatService>>,
    Path(chat_id): Path<ChatId>,

    Json(AddParticipantQuery { user_id: new_member }): Json<AddParticipantQuery>,
) -> AppResult<StatusCode> {
    chats.add_participant(user_id, &chat_id, new_member).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn remove_participant(
    CurrentUser(user_id): CurrentUser,
    State(chats): State<Arc<ChatService>>,
    Path((chat_id, member)): Path<(ChatId, UserId)>,
) -> AppResult<StatusCode> {
    chats.remove_participant(user_id, &chat_id, member).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn online(
    CurrentUser(user_id): CurrentUser,
    State(chats): State<Arc<ChatService>>,
    Path(chat_id): Path<ChatId>,
) -> AppResult<Json<Vec<UserId>>> {
    Ok(Json(chats.online(user_id, &chat_id).await?))
}
