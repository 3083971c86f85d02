use crate::domain::mission_model::MissionRecord;
use crate::domain::mission_model::Registry;
use crate::domain::permission_model::PermissionLevel;
use crate::domain::token_commander::TokenCommander;
use crate::domain::token_model::Caller;
use crate::domain::token_model::SESSION_COOKIE;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::headers::Cookie;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Extension;
use axum::Json;
use axum::RequestPartsExt;
use axum::TypedHeader;
use serde_json::json;
use std::sync::Arc;

/// Outcome of the route guard, attached to the request for the handler.
#[derive(Clone, Debug)]
pub(super) struct Grant {
    pub level: PermissionLevel,
    pub caller: Caller,
    pub mission: Option<MissionRecord>,
    /// The snapshot the guard resolved against.
    pub registry: Arc<Registry>,
}

pub(super) async fn session_token(parts: &mut Parts) -> Option<String> {
    let TypedHeader(cookie) = parts.extract::<TypedHeader<Cookie>>().await.ok()?;
    cookie.get(SESSION_COOKIE).map(|token| token.to_string())
}

/// Identity from the session cookie. Never rejects: a missing or invalid
/// token is an anonymous caller.
pub(super) struct CallerIdentity(pub Caller);

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token_commander = parts
            .extract::<Extension<Arc<TokenCommander>>>()
            .await
            .map_err(|rej| {
                log::error!("Expected to extract TokenCommander: {}", rej.to_string());
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Internal Server Error"})),
                )
                    .into_response()
            })?;

        let token = session_token(parts).await;

        Ok(CallerIdentity(
            token_commander.caller_from_token(token.as_deref()),
        ))
    }
}

/// The mission a guarded route was authorized for.
pub(super) struct GrantedMission {
    pub caller: Caller,
    pub mission: MissionRecord,
    pub registry: Arc<Registry>,
}

#[async_trait]
impl<S> FromRequestParts<S> for GrantedMission
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let grant = parts.extensions.get::<Grant>().cloned().ok_or_else(|| {
            log::error!("Expected a Grant, route registered without a guard");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
        })?;

        match grant.mission {
            Some(mission) => Ok(GrantedMission {
                caller: grant.caller,
                mission,
                registry: grant.registry,
            }),
            None => Err((StatusCode::NOT_FOUND, "not found").into_response()),
        }
    }
}
