pub mod broadcast;
pub mod chats;
pub mod config;
pub mod devices;
pub mod direct;
pub mod error;
pub mod events;
pub mod notify;
pub mod presence;
pub mod push;
pub mod res;
pub mod session;
pub mod store;

use std::sync::Arc;

use axum::{extract::FromRef, http::StatusCode, response::{IntoResponse, Response}, Router};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    broadcast::Broadcaster,
    chats::ChatService,
    config::Config,
    error::ChatError,
    notify::Notifier,
    presence::PresenceRegistry,
    push::{DeviceTokens, GatewayPush, LogPush, PushSender},
    store::{SqliteChatStore, SqliteProfiles},
};

pub type UserId = i64;
pub type ChatId = String;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub chats: Arc<ChatService>,
    pub devices: DeviceTokens,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the store, presence registry, notifier and push transport
    /// around one pool. Spawns the push workers.
    pub fn build(db_pool: SqlitePool, config: Config) -> Self {
        let store = Arc::new(SqliteChatStore::new(db_pool.clone()));
        let devices = DeviceTokens::new(db_pool.clone());

        let push: Arc<dyn PushSender> = match &config.push_gateway_url {
            Some(url) => {
                info!(%url, "push gateway configured");
                Arc::new(GatewayPush::new(reqwest::Client::new(), url, devices.clone()))
            }
            None => Arc::new(LogPush),
        };

        let notifier = Notifier::spawn(
            store.clone(),
            Arc::new(SqliteProfiles::new(db_pool)),
            push,
            config.notifier(),
        );
        let presence = Arc::new(PresenceRegistry::new());
        let broadcaster = Broadcaster::new(store.clone(), presence, notifier);

        AppState {
            chats: Arc::new(ChatService::new(store, broadcaster)),
            devices,
            config: Arc::new(config),
        }
    }
}

pub fn app(app_state: AppState) -> Router {
    let cors_allow_any = app_state.config.cors_allow_any;

    let app = Router::new()
        .merge(chats::router())
        .merge(devices::router())
        .with_state(app_state)
        .layer(TraceLayer::new_for_http());

    if cors_allow_any {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<ChatError>() {
            Some(ChatError::NotFound) => StatusCode::NOT_FOUND,
            Some(ChatError::Forbidden) => StatusCode::FORBIDDEN,
            Some(ChatError::DuplicateId) => StatusCode::CONFLICT,
            Some(
                ChatError::SelfChat | ChatError::UnknownReaction(_) | ChatError::InvalidChat(_),
            ) => StatusCode::BAD_REQUEST,
            Some(ChatError::Unauthenticated) => StatusCode::UNAUTHORIZED,
            Some(ChatError::Store(_)) | None => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(err = ?self.0, "request failed");
            return (status, "internal error").into_response();
        }
        (status, self.0.to_string()).into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(anyhow::Error::msg(err.to_owned()))
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(ChatError);
apperr_impl!(serde_json::Error);
apperr_impl!(sqlx::Error);
apperr_impl!(axum::Error);
apperr_impl!(anyhow::Error);
