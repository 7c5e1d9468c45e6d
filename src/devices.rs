use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use crate::{push::DeviceTokens, session::CurrentUser, AppResult, AppState};

#[derive(Deserialize)]
pub(crate) struct RegisterDeviceQuery {
    token: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/devices", post(register_device))
        .route("/devices/{token}", delete(unregister_device))
}

#[debug_handler(state = AppState)]
pub(crate) async fn register_device(
    CurrentUser(user_id): CurrentUser,
    State(devices): State<DeviceTokens>,

    Json(RegisterDeviceQuery { token }): Json<RegisterDeviceQuery>,
) -> AppResult<StatusCode> {
    let token = token.trim();
    if token.is_empty() {
        return Ok(StatusCode::UNPROCESSABLE_ENTITY);
    }

    devices.register(user_id, token).await?;
    info!(user_id, "device token registered");
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
pub(crate) async fn unregister_device(
    CurrentUser(user_id): CurrentUser,
    State(devices): State<DeviceTokens>,
    Path(token): Path<String>,
) -> AppResult<StatusCode> {
    if devices.unregister(user_id, &token).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}
