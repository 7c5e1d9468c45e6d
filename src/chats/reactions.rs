use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::{session::CurrentUser, store::ReactionKind, AppResult};

use super::service::{ChatService, Posted};

#[derive(Deserialize)]
pub(crate) struct AddReactionQuery {
    reaction_id: String,
    reaction_code: String,
}

/// Returns the broadcast frame, or `204` when the reaction id was already used.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn add_reaction(
    CurrentUser(user_id): CurrentUser,
    State(chats): State<Arc<ChatService>>,
    Path(message_id): Path<String>,

    Json(AddReactionQuery { reaction_id, reaction_code }): Json<AddReactionQuery>,
) -> AppResult<Response> {
    match chats.add_reaction(user_id, &message_id, &reaction_id, &reaction_code).await? {
        Posted::Sent { event, .. } => Ok((StatusCode::CREATED, Json(event)).into_response()),
        Posted::Duplicate => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn remove_reaction(
    CurrentUser(user_id): CurrentUser,
    State(chats): State<Arc<ChatService>>,
    Path((message_id, reaction_code)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    chats.remove_reaction(user_id, &message_id, &reaction_code).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn catalog(
    State(chats): State<Arc<ChatService>>,
) -> AppResult<Json<Vec<ReactionKind>>> {
    Ok(Json(chats.reaction_catalog().await?))
}
