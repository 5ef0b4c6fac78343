use std::fmt::Write as _;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::state::{AppState, ObservabilitySnapshot};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let view = state.engine.snapshot();
    let observability = state.observability.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "spots": view.spots.len(),
        "achieved": view.progress.achieved,
        "ledger": state.engine.ledger_kind().to_string(),
        "navigation": view.navigation.name(),
        "located": view.user_position.is_some(),
        "device": {
            "high_accuracy": state.device.high_accuracy_requested(),
            "position_listeners": state.device.position_listeners(),
            "orientation_listeners": state.device.orientation_listeners(),
        },
        "stream_clients": state.event_tx.receiver_count(),
        "observability": {
            "view_requests_total": observability.view_requests_total,
            "navigation_requests_total": observability.navigation_requests_total,
            "position_reports_total": observability.position_reports_total,
            "lagged_stream_events_total": observability.lagged_stream_events_total,
        }
    }))
}

/// Serve the pre-serialized view snapshot.
pub async fn get_view(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    state.observability.record_view_request();
    let (etag, json): (String, Arc<Bytes>) = {
        let live = state.live_view.read().await;
        (view_etag(live.seq), Arc::clone(&live.state_json))
    };

    if if_none_match_matches(&headers, &etag) {
        return not_modified_response("no-cache", Some(etag.as_str()));
    }

    json_bytes_response((*json).clone(), "no-cache", Some(etag.as_str()))
}

/// Captured photo for a spot, as the data URL the client uploaded.
pub async fn get_photo(State(state): State<AppState>, Path(index): Path<usize>) -> Response {
    match state.engine.photo(index) {
        Some(photo) => (
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            photo,
        )
            .into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no photo for this spot"),
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let view = state.engine.snapshot();
    let body = render_prometheus_metrics(
        view.spots.len(),
        view.progress.achieved,
        state.event_tx.receiver_count(),
        state.observability.snapshot(),
    );

    (
        [
            (header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
}

fn render_prometheus_metrics(
    spot_count: usize,
    achieved_count: usize,
    stream_clients: usize,
    observability: ObservabilitySnapshot,
) -> String {
    let mut body = String::new();
    let mut metric = |name: &str, kind: &str, help: &str, value: u64| {
        let _ = writeln!(body, "# HELP spotwalk_{name} {help}");
        let _ = writeln!(body, "# TYPE spotwalk_{name} {kind}");
        let _ = writeln!(body, "spotwalk_{name} {value}");
    };

    metric("spots", "gauge", "Spots in the loaded catalog.", spot_count as u64);
    metric(
        "achieved_spots",
        "gauge",
        "Catalog spots with an achievement record.",
        achieved_count as u64,
    );
    metric(
        "stream_clients",
        "gauge",
        "Connected event stream clients.",
        stream_clients as u64,
    );
    metric(
        "view_requests_total",
        "counter",
        "Total view snapshot requests.",
        observability.view_requests_total,
    );
    metric(
        "navigation_requests_total",
        "counter",
        "Total navigation requests.",
        observability.navigation_requests_total,
    );
    metric(
        "position_reports_total",
        "counter",
        "Total device position reports.",
        observability.position_reports_total,
    );
    metric(
        "lagged_stream_events_total",
        "counter",
        "Events skipped by stream clients that fell behind.",
        observability.lagged_stream_events_total,
    );
    body
}

fn view_etag(seq: u64) -> String {
    format!("\"view-{seq}\"")
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

fn json_bytes_response(body: Bytes, cache_control: &'static str, etag: Option<&str>) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control),
    );
    if let Some(etag) = etag
        && let Ok(etag_header) = HeaderValue::from_str(etag)
    {
        headers.insert(header::ETAG, etag_header);
    }
    response
}

fn not_modified_response(cache_control: &'static str, etag: Option<&str>) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control),
    );
    if let Some(etag) = etag
        && let Ok(etag_header) = HeaderValue::from_str(etag)
    {
        headers.insert(header::ETAG, etag_header);
    }
    response
}

fn normalize_etag(candidate: &str) -> &str {
    candidate.strip_prefix("W/").unwrap_or(candidate).trim()
}

fn if_none_match_matches(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers.get(header::IF_NONE_MATCH) else {
        return false;
    };
    let Ok(raw) = value.to_str() else {
        return false;
    };

    raw.split(',').any(|candidate| {
        let candidate = candidate.trim();
        candidate == "*" || normalize_etag(candidate) == normalize_etag(etag)
    })
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, header};

    use super::{if_none_match_matches, render_prometheus_metrics, view_etag};
    use crate::state::ObservabilitySnapshot;

    #[test]
    fn metrics_output_contains_help_type_and_values() {
        let observability = ObservabilitySnapshot {
            view_requests_total: 12,
            navigation_requests_total: 3,
            position_reports_total: 40,
            lagged_stream_events_total: 1,
        };

        let metrics = render_prometheus_metrics(88, 5, 2, observability);

        assert!(metrics.contains("# HELP spotwalk_spots"));
        assert!(metrics.contains("# TYPE spotwalk_view_requests_total counter"));
        assert!(metrics.contains("spotwalk_spots 88"));
        assert!(metrics.contains("spotwalk_achieved_spots 5"));
        assert!(metrics.contains("spotwalk_stream_clients 2"));
        assert!(metrics.contains("spotwalk_navigation_requests_total 3"));
        assert!(metrics.contains("spotwalk_position_reports_total 40"));
        assert!(metrics.contains("spotwalk_lagged_stream_events_total 1"));
    }

    #[test]
    fn if_none_match_accepts_weak_and_listed_tags() {
        let etag = view_etag(7);
        let mut headers = HeaderMap::new();
        assert!(!if_none_match_matches(&headers, &etag));

        headers.insert(
            header::IF_NONE_MATCH,
            HeaderValue::from_static("\"view-3\", W/\"view-7\""),
        );
        assert!(if_none_match_matches(&headers, &etag));

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"view-8\""));
        assert!(!if_none_match_matches(&headers, &etag));
    }
}
