//! OSRM-compatible HTTP routing client.

use std::time::Duration;

use async_trait::async_trait;
use geotrack_domain::{Position, Route};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use super::{RoutePlan, RouteProvider, RouteRequest, SnappedWaypoint};
use crate::error::RoutingError;

/// Public OSRM demo server.
pub const DEFAULT_SERVER_URL: &str = "https://router.project-osrm.org/route/v1";

/// Thin HTTP client for the OSRM `route` service.
#[derive(Debug, Clone)]
pub struct OsrmClient {
    client: Client,
    server_url: String,
}

impl OsrmClient {
    /// Create a client for a server base URL such as
    /// `https://router.project-osrm.org/route/v1`.
    pub fn new(server_url: &str) -> Self {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(client: Client, server_url: &str) -> Self {
        Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Request URL. Coordinates go out in provider order (lon,lat).
    pub fn route_url(&self, request: &RouteRequest) -> String {
        format!(
            "{}/{}/{},{};{},{}?overview=full&geometries=geojson",
            self.server_url,
            request.profile,
            request.start.longitude,
            request.start.latitude,
            request.end.longitude,
            request.end.latitude,
        )
    }
}

impl Default for OsrmClient {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}

#[async_trait]
impl RouteProvider for OsrmClient {
    async fn fetch(&self, request: &RouteRequest) -> Result<RoutePlan, RoutingError> {
        let url = Url::parse(&self.route_url(request))
            .map_err(|err| RoutingError::InvalidUrl(format!("{}: {err}", self.server_url)))?;
        tracing::debug!(%url, "Requesting route");

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(RoutingError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(RoutingError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        decode_route_response(&body)
    }
}

#[derive(Deserialize)]
struct OsrmRouteResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
    #[serde(default)]
    waypoints: Vec<OsrmWaypoint>,
}

#[derive(Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    duration: Option<f64>,
    distance: Option<f64>,
}

#[derive(Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

#[derive(Deserialize)]
struct OsrmWaypoint {
    name: Option<String>,
    location: [f64; 2],
}

/// Decode an OSRM `route` response body into a [`RoutePlan`].
///
/// Only the first route is used. A response without routes, or whose
/// first route has no coordinates, is [`RoutingError::EmptyRoute`].
pub fn decode_route_response(body: &str) -> Result<RoutePlan, RoutingError> {
    let parsed: OsrmRouteResponse = serde_json::from_str(body)?;

    if let Some(code) = parsed.code.as_deref() {
        if code != "Ok" {
            tracing::debug!(code, "Routing server reported no route");
        }
    }

    let Some(first) = parsed.routes.into_iter().next() else {
        return Err(RoutingError::EmptyRoute);
    };
    if first.geometry.coordinates.is_empty() {
        return Err(RoutingError::EmptyRoute);
    }

    let route = first
        .geometry
        .coordinates
        .iter()
        .map(|[lon, lat]| Position::new(*lat, *lon))
        .collect::<Vec<_>>();

    let waypoints = parsed
        .waypoints
        .into_iter()
        .map(|wp| SnappedWaypoint {
            name: wp.name.filter(|n| !n.is_empty()),
            location: Position::new(wp.location[1], wp.location[0]),
        })
        .collect();

    Ok(RoutePlan {
        route: Route::new(route),
        duration_s: first.duration,
        distance_m: first.distance,
        waypoints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "code": "Ok",
        "routes": [{
            "geometry": {"type": "LineString", "coordinates": [[7.0982, 50.7374], [7.0990, 50.7380], [7.1001, 50.7391]]},
            "duration": 42.5,
            "distance": 310.2,
            "legs": []
        }],
        "waypoints": [
            {"name": "Adenauerallee", "location": [7.0982, 50.7374], "distance": 1.2},
            {"name": "", "location": [7.1001, 50.7391], "distance": 0.4}
        ]
    }"#;

    #[test]
    fn test_route_url_uses_lon_lat_order() {
        let client = OsrmClient::new("http://localhost:5000/route/v1/");
        let request = RouteRequest {
            start: Position::new(50.1, 7.1),
            end: Position::new(50.2, 7.2),
            profile: "driving".into(),
        };
        assert_eq!(
            client.route_url(&request),
            "http://localhost:5000/route/v1/driving/7.1,50.1;7.2,50.2?overview=full&geometries=geojson"
        );
    }

    #[tokio::test]
    async fn test_unparseable_server_url() {
        let client = OsrmClient::new("not a url");
        let request = RouteRequest {
            start: Position::new(50.1, 7.1),
            end: Position::new(50.2, 7.2),
            profile: "driving".into(),
        };
        let err = client.fetch(&request).await.unwrap_err();
        assert!(matches!(err, RoutingError::InvalidUrl(_)));
    }

    #[test]
    fn test_decode_swaps_coordinates() {
        let plan = decode_route_response(SAMPLE).unwrap();
        assert_eq!(plan.route.len(), 3);
        assert_eq!(plan.route.first(), Some(Position::new(50.7374, 7.0982)));
        assert_eq!(plan.route.last(), Some(Position::new(50.7391, 7.1001)));
        assert_eq!(plan.duration_s, Some(42.5));
        assert_eq!(plan.distance_m, Some(310.2));
        assert_eq!(plan.waypoints.len(), 2);
        assert_eq!(plan.waypoints[0].name.as_deref(), Some("Adenauerallee"));
        assert_eq!(plan.waypoints[1].name, None);
    }

    #[test]
    fn test_decode_without_routes_is_empty_route() {
        let err = decode_route_response(r#"{"code": "NoRoute", "routes": []}"#).unwrap_err();
        assert!(matches!(err, RoutingError::EmptyRoute));

        let err = decode_route_response(
            r#"{"code": "Ok", "routes": [{"geometry": {"coordinates": []}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RoutingError::EmptyRoute));
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        let err = decode_route_response("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, RoutingError::Decode(_)));
    }
}
