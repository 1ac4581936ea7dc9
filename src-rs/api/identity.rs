use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_PICTURE_HEADER: &str = "x-user-picture";

/// The caller as vouched for by the identity gateway in front of the relay.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CallerIdentity {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub picture: Option<String>,
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"loggedIn": false, "message": "No token provided."})),
    )
        .into_response()
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_value(parts, USER_ID_HEADER).ok_or_else(unauthorized)?;
        Ok(CallerIdentity {
            id,
            name: header_value(parts, USER_NAME_HEADER),
            email: header_value(parts, USER_EMAIL_HEADER),
            picture: header_value(parts, USER_PICTURE_HEADER),
        })
    }
}
