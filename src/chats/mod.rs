mod dispatch;
mod msg;
mod new;
mod participants;
mod reactions;
mod service;
mod ws;

use axum::{routing::{delete, get, post}, Router};

use crate::AppState;

pub use dispatch::{Dispatched, EventRouter};
pub use service::{ChatService, CreateChat, Posted};
pub use ws::{Session, SessionState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chats", get(new::list_chats).post(new::create_chat))
        .route("/chats/{chat_id}", get(new::chat))
        .route("/chats/{chat_id}/messages", get(msg::list_messages).post(msg::send_message))
        .route("/chats/{chat_id}/participants", post(participants::add_participant))
        .route("/chats/{chat_id}/participants/{user_id}", delete(participants::remove_participant))
        .route("/chats/{chat_id}/online", get(participants::online))
        .route("/messages/{message_id}/reactions", post(reactions::add_reaction))
        .route(
            "/messages/{message_id}/reactions/{reaction_code}",
            delete(reactions::remove_reaction),
        )
        .route("/reactions", get(reactions::catalog))
        .route("/direct/{user_id}", post(new::direct_chat))
        .route("/ws", get(ws::chat_ws))
}
