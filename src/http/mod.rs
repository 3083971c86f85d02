mod extractors;
mod guard;
mod into_responses;
mod ws;

use crate::domain::control_commander::ControlCommander;
use crate::domain::control_commander::ControlCommanderError;
use crate::domain::control_commander::SaveControlInput;
use crate::domain::control_querier::ControlFile;
use crate::domain::control_querier::ControlQuerier;
use crate::domain::control_querier::ControlQuerierError;
use crate::domain::event_commander::EventCommander;
use crate::domain::event_commander::EventCommanderError;
use crate::domain::event_commander::UrlNotificationInput;
use crate::domain::mission_model::MissionList;
use crate::domain::mission_model::Registry;
use crate::domain::mission_querier::MissionQuerier;
use crate::domain::mission_querier::MissionQuerierError;
use crate::domain::permission_model::Requirement;
use crate::domain::permission_model::Route;
use crate::domain::permission_model::RunMode;
use crate::domain::stream_querier::History;
use crate::domain::stream_querier::StreamQuerier;
use crate::domain::stream_querier::StreamQuerierError;
use crate::domain::token_commander::TokenCommander;
use crate::domain::token_commander::TokenCommanderError;
use crate::domain::token_model::CredentialsInput;
use crate::domain::token_model::SESSION_COOKIE;
use crate::domain::token_model::SESSION_EXPIRES_IN_SECONDS;
use crate::http::extractors::CallerIdentity;
use crate::http::extractors::Grant;
use crate::http::extractors::GrantedMission;
use crate::http::guard::Guards;
use crate::http::ws::forward_frames;
use crate::providers::snapshot::Snapshot;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::WebSocketUpgrade;
use axum::http::header::SET_COOKIE;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Extension;
use axum::Json;
use axum::Router;
use log::debug;
use serde_json::Value;
use std::sync::Arc;

async fn create_session(
    Extension(token_commander): Extension<Arc<TokenCommander>>,
    Json(input): Json<CredentialsInput>,
) -> Result<Response, TokenCommanderError> {
    let token = token_commander.exchange_credentials_for_token(input).await?;

    let cookie = format!(
        "{}={}; Max-Age={}; SameSite=Strict; HttpOnly; Path=/",
        SESSION_COOKIE, token, SESSION_EXPIRES_IN_SECONDS
    );

    Ok(([(SET_COOKIE, cookie)], "authorization ok").into_response())
}

async fn check_user(Extension(grant): Extension<Grant>) -> &'static str {
    debug!("user check at {:?}", grant.level);
    if grant.caller.is_identified() {
        "YES"
    } else {
        "NO"
    }
}

async fn get_missions(
    CallerIdentity(caller): CallerIdentity,
    Extension(mission_querier): Extension<Arc<MissionQuerier>>,
) -> MissionList {
    mission_querier.get_missions(&caller)
}

async fn notify_url(
    Extension(event_commander): Extension<Arc<EventCommander>>,
    Query(input): Query<UrlNotificationInput>,
    body: Option<Json<Value>>,
) -> Result<&'static str, EventCommanderError> {
    event_commander
        .notify_url(input, body.map(|Json(body)| body))
        .await?;

    Ok("ok")
}

async fn get_control(
    granted: GrantedMission,
    Extension(control_querier): Extension<Arc<ControlQuerier>>,
    Path((_glider, which)): Path<(u32, String)>,
) -> Result<ControlFile, ControlQuerierError> {
    control_querier
        .latest_control_file(&granted.mission, &which)
        .await
}

async fn save_control(
    granted: GrantedMission,
    Extension(control_commander): Extension<Arc<ControlCommander>>,
    Path((_glider, which)): Path<(u32, String)>,
    Json(input): Json<SaveControlInput>,
) -> Result<String, ControlCommanderError> {
    control_commander
        .save_control_file(
            granted.caller.user.as_deref(),
            &granted.registry.controls,
            &granted.mission,
            &which,
            input,
        )
        .await
}

async fn chat_history(
    granted: GrantedMission,
    Extension(mission_querier): Extension<Arc<MissionQuerier>>,
) -> Result<Json<Vec<Value>>, MissionQuerierError> {
    let rows = mission_querier
        .get_chat_history(&granted.caller, &granted.mission)
        .await?;

    Ok(Json(rows))
}

async fn mission_stream(
    granted: GrantedMission,
    Extension(stream_querier): Extension<Arc<StreamQuerier>>,
    Path((which, _glider)): Path<(String, u32)>,
    websocket: WebSocketUpgrade,
) -> Result<Response, StreamQuerierError> {
    let label = format!("{} stream for {}", which, granted.mission.key());
    let frames = stream_querier
        .mission_stream(granted.caller, granted.mission, History::from_variant(&which))
        .await?;

    Ok(websocket.on_upgrade(move |socket| forward_frames(socket, frames, label)))
}

async fn position_stream(
    granted: GrantedMission,
    Extension(stream_querier): Extension<Arc<StreamQuerier>>,
    websocket: WebSocketUpgrade,
) -> Result<Response, StreamQuerierError> {
    let label = format!("position stream for {}", granted.mission.key());
    let frames = stream_querier.position_stream(granted.mission).await?;

    Ok(websocket.on_upgrade(move |socket| forward_frames(socket, frames, label)))
}

async fn watch_stream(
    CallerIdentity(caller): CallerIdentity,
    Extension(stream_querier): Extension<Arc<StreamQuerier>>,
    websocket: WebSocketUpgrade,
) -> Result<Response, StreamQuerierError> {
    let label = format!("watch stream for {:?}", caller.user);
    let frames = stream_querier.watch_stream(caller).await?;

    Ok(websocket.on_upgrade(move |socket| forward_frames(socket, frames, label)))
}

#[allow(clippy::too_many_arguments)]
pub fn vis_route(
    registry: Arc<Snapshot<Registry>>,
    token_commander: Arc<TokenCommander>,
    mission_querier: Arc<MissionQuerier>,
    control_querier: Arc<ControlQuerier>,
    control_commander: Arc<ControlCommander>,
    event_commander: Arc<EventCommander>,
    stream_querier: Arc<StreamQuerier>,
) -> Router {
    let guards = Guards::new(registry, token_commander.clone());
    let pilot_modes = [RunMode::Pilot, RunMode::Private];

    Router::new()
        .route("/auth", post(create_session))
        .route(
            "/user",
            guards.protect(
                Route::User,
                Requirement::endpoint_only().in_modes(&pilot_modes),
                get(check_user),
            ),
        )
        .route("/missions", get(get_missions))
        .route("/url", post(notify_url))
        .route(
            "/control/:glider/:which",
            guards.protect(Route::Control, Requirement::mission(), get(get_control)),
        )
        .route(
            "/save/:glider/:which",
            guards.protect(
                Route::Save,
                Requirement::mission().in_modes(&pilot_modes).pilot(),
                post(save_control),
            ),
        )
        .route(
            "/chat/history/:glider",
            guards.protect(
                Route::Chat,
                Requirement::mission().in_modes(&pilot_modes),
                get(chat_history),
            ),
        )
        .route(
            "/stream/:which/:glider",
            guards.protect(Route::Stream, Requirement::mission(), get(mission_stream)),
        )
        .route(
            "/pos/stream/:glider",
            guards.protect(Route::Pos, Requirement::mission(), get(position_stream)),
        )
        .route("/watch", get(watch_stream))
        .layer(Extension(token_commander))
        .layer(Extension(mission_querier))
        .layer(Extension(control_querier))
        .layer(Extension(control_commander))
        .layer(Extension(event_commander))
        .layer(Extension(stream_querier))
}
