use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{error::ChatError, AppError, UserId};

/// Set by the authenticating gateway in front of this service once the
/// caller's token has been verified.
pub const USER_ID: &str = "x-user-id";

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .ok_or(ChatError::Unauthenticated)?;
        Ok(CurrentUser(user_id))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(header: Option<&str>) -> Result<CurrentUser, AppError> {
        let mut builder = Request::builder().uri("/chats");
        if let Some(header) = header {
            builder = builder.header(USER_ID, header);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        CurrentUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_gateway_header() {
        assert_eq!(extract(Some(" 42 ")).await.unwrap(), CurrentUser(42));
        assert!(extract(Some("abc")).await.is_err());
        assert!(extract(None).await.is_err());
    }
}
