use crate::domain::mission_model::MissionSelector;
use crate::domain::mission_model::Registry;
use crate::domain::permission_model::PermissionLevel;
use crate::domain::permission_model::Requirement;
use crate::domain::permission_model::Route;
use crate::domain::permission_resolver::resolve;
use crate::domain::permission_resolver::MODE_EXCLUDED;
use crate::domain::token_commander::TokenCommander;
use crate::http::extractors::session_token;
use crate::http::extractors::Grant;
use crate::providers::snapshot::Snapshot;
use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::Request;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::MethodRouter;
use log::info;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds the per-route authorization stage. Every protected route is
/// registered through [`Guards::protect`].
#[derive(Clone)]
pub(super) struct Guards {
    registry: Arc<Snapshot<Registry>>,
    token_commander: Arc<TokenCommander>,
}

impl Guards {
    pub fn new(registry: Arc<Snapshot<Registry>>, token_commander: Arc<TokenCommander>) -> Self {
        Self {
            registry,
            token_commander,
        }
    }

    pub fn protect(
        &self,
        route: Route,
        requirement: Requirement,
        handler: MethodRouter,
    ) -> MethodRouter {
        let guard = RouteGuard {
            route,
            requirement,
            registry: self.registry.clone(),
            token_commander: self.token_commander.clone(),
        };
        handler.route_layer(from_fn_with_state(guard, authorize))
    }
}

#[derive(Clone)]
struct RouteGuard {
    route: Route,
    requirement: Requirement,
    registry: Arc<Snapshot<Registry>>,
    token_commander: Arc<TokenCommander>,
}

async fn authorize(
    State(guard): State<RouteGuard>,
    request: Request<Body>,
    next: Next<Body>,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let token = session_token(&mut parts).await;
    let caller = guard.token_commander.caller_from_token(token.as_deref());

    let params = Path::<HashMap<String, String>>::from_request_parts(&mut parts, &())
        .await
        .map(|Path(params)| params)
        .unwrap_or_default();
    let glider = params.get("glider").and_then(|g| g.parse::<u32>().ok());

    let selector = Query::<MissionSelector>::from_request_parts(&mut parts, &())
        .await
        .map(|Query(selector)| selector)
        .unwrap_or_default();

    let registry = guard.registry.load();
    let resolution = resolve(
        &registry,
        guard.route,
        &guard.requirement,
        glider,
        selector.as_deref(),
        &caller,
    );

    let path = parts.uri.path().to_string();
    info!(
        "{} {} for {:?}: {:?}, {}",
        guard.route, path, caller.user, resolution.level, resolution.reason
    );

    match resolution.level {
        PermissionLevel::Invalid if resolution.reason == MODE_EXCLUDED => {
            (StatusCode::NOT_FOUND, format!("Page not found: {}", path)).into_response()
        }
        PermissionLevel::Invalid => (StatusCode::NOT_FOUND, "not found").into_response(),
        PermissionLevel::Reject => (StatusCode::FORBIDDEN, "authorization failed").into_response(),
        level => {
            let mission = glider.and_then(|g| registry.find_mission(g, selector.as_deref()).cloned());
            parts.extensions.insert(Grant {
                level,
                caller,
                mission,
                registry,
            });
            next.run(Request::from_parts(parts, body)).await
        }
    }
}
