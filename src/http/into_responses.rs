use crate::domain::control_commander::ControlCommanderError;
use crate::domain::control_querier::ControlFile;
use crate::domain::control_querier::ControlQuerierError;
use crate::domain::event_commander::EventCommanderError;
use crate::domain::mission_model::MissionList;
use crate::domain::mission_querier::MissionQuerierError;
use crate::domain::stream_querier::StreamQuerierError;
use crate::domain::token_commander::TokenCommanderError;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use log::error;
use log::info;
use serde_json::json;

// Browser clients match on these bodies, so they stay plain text.

impl IntoResponse for TokenCommanderError {
    fn into_response(self) -> Response {
        match self {
            TokenCommanderError::BadCredentials => {
                (StatusCode::UNAUTHORIZED, "authorization failed").into_response()
            }
            TokenCommanderError::TokenImplError(err) => {
                error!("error producing session token: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "authorization failed").into_response()
            }
        }
    }
}

impl IntoResponse for ControlCommanderError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControlCommanderError::NotAllowed => StatusCode::FORBIDDEN,
            ControlCommanderError::FileMismatch => StatusCode::BAD_REQUEST,
            ControlCommanderError::WriteError { .. } => {
                error!("{}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, self.to_string()).into_response()
    }
}

impl IntoResponse for ControlQuerierError {
    fn into_response(self) -> Response {
        match self {
            ControlQuerierError::UnknownControlFile => {
                (StatusCode::BAD_REQUEST, "oops").into_response()
            }
            ControlQuerierError::NoControlFile => (StatusCode::OK, "none").into_response(),
            ControlQuerierError::ReadError(err) => {
                error!("error reading control file: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "none").into_response()
            }
        }
    }
}

impl IntoResponse for EventCommanderError {
    fn into_response(self) -> Response {
        let status = match &self {
            EventCommanderError::BadInstrument | EventCommanderError::NothingToNotify => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        info!("url notification refused: {}", self);

        (status, "error").into_response()
    }
}

impl IntoResponse for MissionQuerierError {
    fn into_response(self) -> Response {
        match self {
            MissionQuerierError::ChatDisabled => {
                (StatusCode::FORBIDDEN, "not allowed").into_response()
            }
            MissionQuerierError::Unidentified => {
                (StatusCode::FORBIDDEN, "authorization failed").into_response()
            }
            MissionQuerierError::StateImplError(err) => {
                error!("error reading mission database: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Internal server error"})),
                )
                    .into_response()
            }
        }
    }
}

impl IntoResponse for StreamQuerierError {
    fn into_response(self) -> Response {
        error!("cannot open stream: {}", self);
        (StatusCode::SERVICE_UNAVAILABLE, "no").into_response()
    }
}

impl IntoResponse for MissionList {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(json!(self))).into_response()
    }
}

impl IntoResponse for ControlFile {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(json!(self))).into_response()
    }
}
