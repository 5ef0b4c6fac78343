use std::path::Path;

use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, header},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;

use crate::routes;
use crate::state::AppState;

pub(crate) fn build_app(state: AppState, static_dir: &Path) -> Router {
    let static_assets = Router::new()
        .fallback_service(
            ServeDir::new(static_dir)
                .precompressed_br()
                .precompressed_gzip(),
        )
        .layer(middleware::from_fn(set_static_cache_control));

    let app = Router::new()
        .route("/api/view", get(routes::api::get_view))
        .route("/api/events", get(routes::sse::view_events))
        .route(
            "/api/device/position",
            post(routes::commands::report_position),
        )
        .route(
            "/api/device/orientation",
            post(routes::commands::report_orientation),
        )
        .route(
            "/api/navigation",
            post(routes::commands::start_navigation).delete(routes::commands::clear_navigation),
        )
        .route(
            "/api/spots/{index}/photo",
            get(routes::api::get_photo).post(routes::commands::capture_photo),
        )
        .route(
            "/api/spots/{index}/achievement",
            delete(routes::commands::revoke_achievement),
        )
        .route("/api/health", get(routes::api::health))
        .route("/api/metrics", get(routes::api::metrics));

    app.layer(CompressionLayer::new())
        .fallback_service(static_assets)
        .with_state(state)
}

async fn set_static_cache_control(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    let mut response = next.run(request).await;

    if response.status().is_success()
        && let Some(cache_control) = cache_control_for_path(&path)
    {
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(cache_control),
        );
    }

    response
}

fn cache_control_for_path(path: &str) -> Option<&'static str> {
    if is_hashed_bundle_asset(path) {
        return Some("public, max-age=31536000, immutable");
    }

    if path.starts_with("/images/") || path.starts_with("/icons/") || path.ends_with(".csv") {
        return Some("public, max-age=86400");
    }

    None
}

fn is_hashed_bundle_asset(path: &str) -> bool {
    let Some(ext) = Path::new(path).extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    if !matches!(ext, "js" | "css") {
        return false;
    }

    let Some(filename) = Path::new(path).file_name().and_then(|name| name.to_str()) else {
        return false;
    };

    filename
        .split(['-', '_', '.'])
        .any(|segment| segment.len() >= 8 && segment.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use spotwalk_shared::{Coordinate, NavigationPhase, Spot, ViewState};
    use tower::ServiceExt;

    use super::*;
    use crate::engine::{EngineParts, ReconciliationEngine};
    use crate::error::RouteError;
    use crate::services::ledger::LocalLedger;
    use crate::services::local_store::KeyValueStore;
    use crate::services::photo_store::PhotoStore;
    use crate::services::position_tracker::DeviceFeed;
    use crate::services::route_service::{RouteFuture, RouteService};

    struct StraightLine;

    impl RouteService for StraightLine {
        fn fetch_walking_route(&self, origin: Coordinate, destination: Coordinate) -> RouteFuture<'_> {
            Box::pin(async move {
                if destination.latitude > 80.0 {
                    return Err(RouteError::NoRouteFound);
                }
                Ok(vec![origin, destination])
            })
        }
    }

    async fn test_app() -> (Router, ReconciliationEngine, AppState) {
        let device = DeviceFeed::new(16);
        let ledger = LocalLedger::open(Arc::new(KeyValueStore::ephemeral()), 16).await;
        let engine = ReconciliationEngine::start(EngineParts {
            spots: vec![
                Spot {
                    index: 0,
                    label: "Hikawa Shrine".into(),
                    coordinate: Coordinate::new(139.4889, 35.9251),
                },
                Spot {
                    index: 1,
                    label: "Kita Park".into(),
                    coordinate: Coordinate::new(139.5, 35.93),
                },
            ],
            sensors: Arc::new(device.clone()),
            ledger: Arc::new(ledger),
            routes: Arc::new(StraightLine),
            photos: Arc::new(PhotoStore::in_memory()),
            queue_capacity: 32,
            notice_buffer: 8,
        });
        let state = AppState::new(engine.handle(), device);
        tokio::spawn(crate::services::view_publisher::run(state.clone()));
        let app = build_app(state.clone(), Path::new("public"));
        (app, engine, state)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    async fn wait_for_view(state: &AppState, predicate: impl Fn(&ViewState) -> bool) {
        let mut view = state.engine.watch();
        tokio::time::timeout(Duration::from_secs(2), view.wait_for(|s| predicate(&**s)))
            .await
            .expect("view should reach expected state")
            .expect("engine running");
    }

    #[test]
    fn immutable_cache_for_hashed_bundle_assets() {
        assert_eq!(
            cache_control_for_path("/spotwalk-71578f6b278221f3.js"),
            Some("public, max-age=31536000, immutable")
        );
        assert_eq!(
            cache_control_for_path("/style-a93762ff3bf6d63a.css"),
            Some("public, max-age=31536000, immutable")
        );
    }

    #[test]
    fn short_cache_for_unhashed_static_assets() {
        assert_eq!(
            cache_control_for_path("/images/pin.png"),
            Some("public, max-age=86400")
        );
        assert_eq!(
            cache_control_for_path("/output_with_coords.csv"),
            Some("public, max-age=86400")
        );
    }

    #[test]
    fn no_cache_header_override_for_html() {
        assert_eq!(cache_control_for_path("/"), None);
        assert_eq!(cache_control_for_path("/index.html"), None);
        assert_eq!(cache_control_for_path("/bundle-71578f6b278221f3.wasm"), None);
    }

    #[tokio::test]
    async fn navigation_round_trip_over_http() {
        let (app, engine, state) = test_app().await;

        let early = app
            .clone()
            .oneshot(json_request("POST", "/api/navigation", serde_json::json!({"spotIndex": 1})))
            .await
            .expect("response");
        assert_eq!(early.status(), StatusCode::PRECONDITION_FAILED);

        let accepted = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/device/position",
                serde_json::json!({"longitude": 139.48, "latitude": 35.92, "accuracy": 6.0}),
            ))
            .await
            .expect("response");
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);
        wait_for_view(&state, |s| s.user_position.is_some()).await;

        let routed = app
            .clone()
            .oneshot(json_request("POST", "/api/navigation", serde_json::json!({"spotIndex": 1})))
            .await
            .expect("response");
        assert_eq!(routed.status(), StatusCode::OK);
        let view: ViewState = body_json(routed).await;
        assert_eq!(view.navigation, NavigationPhase::RouteActive);
        let route = view.active_route.expect("active route");
        assert_eq!(route.destination, Coordinate::new(139.5, 35.93));

        let unknown = app
            .clone()
            .oneshot(json_request("POST", "/api/navigation", serde_json::json!({"spotIndex": 9})))
            .await
            .expect("response");
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let no_route = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/navigation",
                serde_json::json!({"longitude": 0.0, "latitude": 89.0}),
            ))
            .await
            .expect("response");
        assert_eq!(no_route.status(), StatusCode::NOT_FOUND);

        let cleared = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/navigation")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(cleared.status(), StatusCode::NO_CONTENT);
        wait_for_view(&state, |s| s.navigation == NavigationPhase::Idle).await;

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn photo_capture_records_and_view_supports_etag() {
        let (app, engine, state) = test_app().await;

        let anonymous = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/spots/0/photo",
                serde_json::json!({"photo": "data:image/png;base64,AA"}),
            ))
            .await
            .expect("response");
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let captured = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/spots/0/photo",
                serde_json::json!({"userId": "u1", "nickname": "walker", "photo": "data:image/png;base64,AA"}),
            ))
            .await
            .expect("response");
        assert_eq!(captured.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(captured).await;
        assert_eq!(body["recorded"], serde_json::json!(true));
        wait_for_view(&state, |s| s.spots[0].achieved && s.spots[0].has_photo).await;

        // The publisher serializes asynchronously; poll until it catches up.
        let mut etag = None;
        for _ in 0..50 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri("/api/view").body(Body::empty()).expect("request"))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
            let tag = response.headers().get(header::ETAG).cloned();
            let view: ViewState = body_json(response).await;
            if view.progress.achieved == 1 {
                etag = tag;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let etag = etag.expect("view with achievement served");

        let not_modified = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/view")
                    .header(header::IF_NONE_MATCH, etag)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(not_modified.status(), StatusCode::NOT_MODIFIED);

        let photo = app
            .clone()
            .oneshot(Request::builder().uri("/api/spots/0/photo").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(photo.status(), StatusCode::OK);

        let revoked = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/spots/0/achievement")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(revoked.status(), StatusCode::NO_CONTENT);
        wait_for_view(&state, |s| !s.spots[0].achieved).await;

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn health_reports_ledger_and_navigation() {
        let (app, engine, _state) = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response).await;
        assert_eq!(body["status"], serde_json::json!("ok"));
        assert_eq!(body["spots"], serde_json::json!(2));
        assert_eq!(body["ledger"], serde_json::json!("local"));
        assert_eq!(body["navigation"], serde_json::json!("idle"));

        engine.shutdown().await;
    }
}
