use futures::future::BoxFuture;
use serde::Deserialize;
use spotwalk_shared::Coordinate;
use tracing::{debug, warn};

use crate::error::RouteError;

const MAX_ERROR_BODY_PREVIEW: usize = 200;

pub type RouteFuture<'a> = BoxFuture<'a, Result<Vec<Coordinate>, RouteError>>;

/// One-shot walking directions lookups. Implementations hold no state
/// between calls.
pub trait RouteService: Send + Sync {
    fn fetch_walking_route(&self, origin: Coordinate, destination: Coordinate) -> RouteFuture<'_>;
}

/// Mapbox-compatible directions backend.
pub struct DirectionsClient {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl DirectionsClient {
    pub fn new(http: reqwest::Client, base_url: String, access_token: Option<String>) -> Self {
        if access_token.is_none() {
            warn!("MAPBOX_ACCESS_TOKEN is not set; directions requests will likely be rejected");
        }
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    fn request_url(&self, origin: Coordinate, destination: Coordinate) -> String {
        format!(
            "{}/directions/v5/mapbox/walking/{};{}",
            self.base_url,
            origin.to_path_segment(),
            destination.to_path_segment()
        )
    }

    async fn fetch(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<Vec<Coordinate>, RouteError> {
        let mut query = vec![("geometries", "geojson")];
        if let Some(token) = self.access_token.as_deref() {
            query.push(("access_token", token));
        }

        let resp = self
            .http
            .get(self.request_url(origin, destination))
            .query(&query)
            .send()
            .await
            .map_err(|e| RouteError::Network(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| RouteError::Network(e.to_string()))?;
        debug!(%status, bytes = body.len(), "directions response received");
        parse_directions_payload(status, &body)
    }
}

impl RouteService for DirectionsClient {
    fn fetch_walking_route(&self, origin: Coordinate, destination: Coordinate) -> RouteFuture<'_> {
        Box::pin(self.fetch(origin, destination))
    }
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    routes: Option<Vec<DirectionsRoute>>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    geometry: RouteGeometry,
}

#[derive(Debug, Deserialize)]
struct RouteGeometry {
    coordinates: Vec<Coordinate>,
}

fn is_no_route_code(code: Option<&str>) -> bool {
    matches!(code, Some("NoRoute" | "NoSegment"))
}

/// Map a directions response onto the first route's geometry.
pub fn parse_directions_payload(
    status: reqwest::StatusCode,
    body: &[u8],
) -> Result<Vec<Coordinate>, RouteError> {
    let parsed = serde_json::from_slice::<DirectionsResponse>(body);

    if !status.is_success() {
        if let Ok(payload) = &parsed
            && is_no_route_code(payload.code.as_deref())
        {
            return Err(RouteError::NoRouteFound);
        }
        return Err(RouteError::Network(format!(
            "directions backend returned {status}: {}",
            body_preview(body)
        )));
    }

    let payload = parsed.map_err(|e| RouteError::Network(format!("invalid directions payload: {e}")))?;
    if is_no_route_code(payload.code.as_deref()) {
        return Err(RouteError::NoRouteFound);
    }
    payload
        .routes
        .and_then(|routes| routes.into_iter().next())
        .map(|route| route.geometry.coordinates)
        .ok_or(RouteError::NoRouteFound)
}

fn body_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(MAX_ERROR_BODY_PREVIEW).collect()
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::{Path, RawQuery, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use reqwest::StatusCode as ReqwestStatus;
    use spotwalk_shared::Coordinate;

    use super::{DirectionsClient, RouteService, parse_directions_payload};
    use crate::error::RouteError;

    async fn spawn_test_server(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test app");
        });
        (addr, handle)
    }

    #[test]
    fn first_route_geometry_is_used() {
        let body = br#"{
            "code": "Ok",
            "routes": [
                {"geometry": {"type": "LineString", "coordinates": [[139.1, 35.1], [139.2, 35.2]]}},
                {"geometry": {"type": "LineString", "coordinates": [[0.0, 0.0]]}}
            ]
        }"#;
        let geometry = parse_directions_payload(ReqwestStatus::OK, body).expect("route");
        assert_eq!(
            geometry,
            vec![Coordinate::new(139.1, 35.1), Coordinate::new(139.2, 35.2)]
        );
    }

    #[test]
    fn empty_or_missing_routes_mean_no_route() {
        assert_eq!(
            parse_directions_payload(ReqwestStatus::OK, br#"{"routes": []}"#),
            Err(RouteError::NoRouteFound)
        );
        assert_eq!(
            parse_directions_payload(ReqwestStatus::OK, br#"{"code": "Ok"}"#),
            Err(RouteError::NoRouteFound)
        );
        assert_eq!(
            parse_directions_payload(
                ReqwestStatus::UNPROCESSABLE_ENTITY,
                br#"{"code": "NoSegment", "message": "No road segment"}"#
            ),
            Err(RouteError::NoRouteFound)
        );
    }

    #[test]
    fn transport_and_decode_failures_are_network_errors() {
        assert!(matches!(
            parse_directions_payload(ReqwestStatus::UNAUTHORIZED, br#"{"message": "Not Authorized"}"#),
            Err(RouteError::Network(message)) if message.contains("401")
        ));
        assert!(matches!(
            parse_directions_payload(ReqwestStatus::OK, b"<html>"),
            Err(RouteError::Network(_))
        ));
    }

    #[tokio::test]
    async fn client_requests_walking_geojson_route() {
        let seen: Arc<Mutex<Option<(String, String)>>> = Arc::new(Mutex::new(None));
        let app = Router::new()
            .route(
                "/directions/v5/mapbox/walking/{coords}",
                get(
                    |State(seen): State<Arc<Mutex<Option<(String, String)>>>>,
                     Path(coords): Path<String>,
                     RawQuery(query): RawQuery| async move {
                        *seen.lock().expect("lock") = Some((coords, query.unwrap_or_default()));
                        (
                            StatusCode::OK,
                            r#"{"routes":[{"geometry":{"coordinates":[[1.0,2.0],[3.0,4.0]]}}]}"#,
                        )
                    },
                ),
            )
            .with_state(Arc::clone(&seen));
        let (addr, server) = spawn_test_server(app).await;

        let client = DirectionsClient::new(
            reqwest::Client::new(),
            format!("http://{addr}/"),
            Some("tok".to_string()),
        );
        let geometry = client
            .fetch_walking_route(Coordinate::new(1.0, 2.0), Coordinate::new(3.0, 4.0))
            .await
            .expect("route");
        assert_eq!(geometry.len(), 2);

        let (coords, query) = seen.lock().expect("lock").clone().expect("request seen");
        assert_eq!(coords, "1,2;3,4");
        assert!(query.contains("geometries=geojson"));
        assert!(query.contains("access_token=tok"));

        server.abort();
        let _ = server.await;
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let client = DirectionsClient::new(reqwest::Client::new(), format!("http://{addr}"), None);
        let err = client
            .fetch_walking_route(Coordinate::new(1.0, 2.0), Coordinate::new(3.0, 4.0))
            .await
            .expect_err("nothing is listening");
        assert!(matches!(err, RouteError::Network(_)));
    }
}
