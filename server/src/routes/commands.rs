use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use spotwalk_shared::Coordinate;
use tracing::{debug, warn};

use crate::engine::{Achiever, CaptureOutcome, NavigationOutcome, NavigationRequest};
use crate::error::{CommandError, NavigationError, PositionError, RouteError};
use crate::routes::api::error_response;
use crate::services::position_tracker::PositionFix;
use crate::state::AppState;

/// A browser geolocation callback: either a fix or the error it reported.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PositionReport {
    Fix {
        longitude: f64,
        latitude: f64,
        #[serde(default)]
        accuracy: Option<f64>,
    },
    Failure {
        error: PositionFailure,
    },
}

#[derive(Debug, Deserialize)]
pub struct PositionFailure {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrientationReport {
    #[serde(default)]
    pub alpha: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NavigationBody {
    #[serde(rename_all = "camelCase")]
    Spot { spot_index: usize },
    Point { longitude: f64, latitude: f64 },
}

impl From<NavigationBody> for NavigationRequest {
    fn from(body: NavigationBody) -> Self {
        match body {
            NavigationBody::Spot { spot_index } => Self::Spot(spot_index),
            NavigationBody::Point {
                longitude,
                latitude,
            } => Self::Point(Coordinate::new(longitude, latitude)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoCapture {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    pub photo: String,
}

pub async fn report_position(
    State(state): State<AppState>,
    Json(report): Json<PositionReport>,
) -> StatusCode {
    state.observability.record_position_report();
    let reading = match report {
        PositionReport::Fix {
            longitude,
            latitude,
            accuracy,
        } => Ok(PositionFix {
            coordinate: Coordinate::new(longitude, latitude),
            accuracy,
        }),
        PositionReport::Failure { error } => Err(PositionError::from_code(error.code, error.message)),
    };
    let listeners = state.device.report_position(reading);
    if listeners == 0 {
        warn!("position report dropped: tracker is not listening");
    }
    StatusCode::ACCEPTED
}

pub async fn report_orientation(
    State(state): State<AppState>,
    Json(report): Json<OrientationReport>,
) -> StatusCode {
    if state.device.report_orientation(report.alpha) == 0 {
        debug!("orientation report dropped: tracker is not listening");
    }
    StatusCode::ACCEPTED
}

pub async fn start_navigation(
    State(state): State<AppState>,
    Json(body): Json<NavigationBody>,
) -> Response {
    state.observability.record_navigation_request();
    match state.engine.start_navigation(body.into()).await {
        Ok(NavigationOutcome::Active(_)) => Json(state.engine.snapshot().as_ref().clone()).into_response(),
        Ok(NavigationOutcome::Superseded) => error_response(
            StatusCode::CONFLICT,
            "superseded by a newer navigation request",
        ),
        Err(e) => navigation_error_response(&e),
    }
}

pub async fn clear_navigation(State(state): State<AppState>) -> Response {
    match state.engine.clear_navigation().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => navigation_error_response(&e),
    }
}

pub async fn capture_photo(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(body): Json<PhotoCapture>,
) -> Response {
    let achiever = Achiever {
        user_id: body.user_id.unwrap_or_default(),
        nickname: body.nickname.unwrap_or_default(),
    };
    match state.engine.capture_photo(index, achiever, body.photo).await {
        Ok(outcome) => Json(serde_json::json!({
            "recorded": outcome == CaptureOutcome::Recorded,
        }))
        .into_response(),
        Err(e) => command_error_response(&e),
    }
}

pub async fn revoke_achievement(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Response {
    match state.engine.revoke_achievement(index).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => command_error_response(&e),
    }
}

fn navigation_error_response(e: &NavigationError) -> Response {
    let status = match e {
        NavigationError::LocationUnavailable => StatusCode::PRECONDITION_FAILED,
        NavigationError::UnknownSpot(_) | NavigationError::Route(RouteError::NoRouteFound) => {
            StatusCode::NOT_FOUND
        }
        NavigationError::Route(RouteError::Network(_)) => StatusCode::BAD_GATEWAY,
        NavigationError::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(status, e.to_string())
}

fn command_error_response(e: &CommandError) -> Response {
    let status = match e {
        CommandError::UnknownSpot(_) => StatusCode::NOT_FOUND,
        CommandError::NotSignedIn => StatusCode::UNAUTHORIZED,
        CommandError::Write(_) => StatusCode::BAD_GATEWAY,
        CommandError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CommandError::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(status, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::{NavigationBody, PositionReport};
    use crate::engine::NavigationRequest;
    use crate::error::PositionError;
    use spotwalk_shared::Coordinate;

    #[test]
    fn position_report_accepts_fix_or_error() {
        let fix: PositionReport =
            serde_json::from_str(r#"{"longitude": 139.5, "latitude": 35.9, "accuracy": 12.0}"#)
                .expect("fix");
        assert!(matches!(fix, PositionReport::Fix { accuracy: Some(a), .. } if a == 12.0));

        let failure: PositionReport =
            serde_json::from_str(r#"{"error": {"code": 1, "message": "denied"}}"#).expect("error");
        let PositionReport::Failure { error } = failure else {
            panic!("expected failure");
        };
        assert_eq!(
            PositionError::from_code(error.code, error.message),
            PositionError::PermissionDenied
        );
    }

    #[test]
    fn navigation_body_targets_spot_or_point() {
        let spot: NavigationBody = serde_json::from_str(r#"{"spotIndex": 4}"#).expect("spot");
        assert_eq!(NavigationRequest::from(spot), NavigationRequest::Spot(4));

        let point: NavigationBody =
            serde_json::from_str(r#"{"longitude": 1.5, "latitude": 2.5}"#).expect("point");
        assert_eq!(
            NavigationRequest::from(point),
            NavigationRequest::Point(Coordinate::new(1.5, 2.5))
        );
    }
}
