// overpass.rs
//
// Geodata gateway: traffic signals and road geometry for the dispatch grid,
// fetched from a set of equivalent Overpass mirrors.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::config::GeodataConfig;
use crate::error::GeodataError;
use crate::shared_data::LatLon;
use crate::simulation_engine::intersections::IntersectionId;

/// Status code and body of one mirror response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// HTTP boundary of the gateway.
pub trait OverpassTransport: Send + Sync {
    fn post(
        &self,
        endpoint: &str,
        query: &str,
    ) -> impl Future<Output = Result<TransportResponse, GeodataError>> + Send;
}

pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, GeodataError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeodataError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

impl OverpassTransport for ReqwestTransport {
    async fn post(&self, endpoint: &str, query: &str) -> Result<TransportResponse, GeodataError> {
        let response = self
            .http
            .post(endpoint)
            .body(query.to_string())
            .send()
            .await
            .map_err(|e| GeodataError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| GeodataError::Transport(e.to_string()))?;
        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// A node tagged `highway=traffic_signals`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSite {
    pub id: IntersectionId,
    pub position: LatLon,
    pub tags: HashMap<String, String>,
}

/// A primary, secondary or residential way.
#[derive(Debug, Clone, PartialEq)]
pub struct Road {
    pub id: u64,
    pub highway: String,
    pub name: Option<String>,
    pub geometry: Vec<LatLon>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapData {
    pub signals: Vec<SignalSite>,
    pub roads: Vec<Road>,
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    elements: Option<Vec<Element>>,
}

#[derive(Debug, Deserialize)]
struct Element {
    #[serde(rename = "type")]
    kind: String,
    id: u64,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    geometry: Vec<Option<GeometryPoint>>,
}

#[derive(Debug, Deserialize)]
struct GeometryPoint {
    lat: f64,
    lon: f64,
}

/// Overpass QL for signals and the main road classes inside `bbox`.
pub fn build_query(bbox: [f64; 4]) -> String {
    let bbox = bbox
        .iter()
        .map(|v| format!("{:.4}", v))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "[out:json][timeout:60];\n(\n  node[\"highway\"=\"traffic_signals\"]({bbox});\n  way[\"highway\"~\"primary|secondary|residential\"]({bbox});\n);\nout geom;\n"
    )
}

/// Splits the flat element list into signal nodes and roads. Signals without
/// coordinates are dropped.
pub fn parse_map_data(body: &[u8]) -> Result<MapData, GeodataError> {
    let response: OverpassResponse =
        serde_json::from_slice(body).map_err(|e| GeodataError::InvalidFormat(e.to_string()))?;
    let elements = response
        .elements
        .ok_or_else(|| GeodataError::InvalidFormat("missing elements".to_string()))?;

    let mut data = MapData::default();
    for element in elements {
        let highway = element.tags.get("highway").cloned();
        match (element.kind.as_str(), highway) {
            ("node", Some(h)) if h == "traffic_signals" => {
                if let (Some(lat), Some(lon)) = (element.lat, element.lon) {
                    data.signals.push(SignalSite {
                        id: IntersectionId::from(element.id),
                        position: LatLon::new(lat, lon),
                        tags: element.tags,
                    });
                }
            }
            ("way", Some(highway)) => data.roads.push(Road {
                id: element.id,
                name: element.tags.get("name").cloned(),
                highway,
                geometry: element
                    .geometry
                    .into_iter()
                    .flatten()
                    .map(|p| LatLon::new(p.lat, p.lon))
                    .collect(),
            }),
            _ => {}
        }
    }
    Ok(data)
}

pub struct OverpassGateway<T = ReqwestTransport> {
    transport: T,
    config: GeodataConfig,
}

impl OverpassGateway<ReqwestTransport> {
    pub fn from_config(config: GeodataConfig) -> Result<Self, GeodataError> {
        let transport = ReqwestTransport::new(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { transport, config })
    }
}

impl<T: OverpassTransport> OverpassGateway<T> {
    pub fn new(transport: T, config: GeodataConfig) -> Self {
        Self { transport, config }
    }

    /// Fetches the grid, rotating through the mirrors. Attempt `n` goes to
    /// mirror `n mod len`; a 429 waits the longer rate-limit backoff.
    pub async fn fetch_map_data(&self) -> Result<MapData, GeodataError> {
        if self.config.endpoints.is_empty() {
            return Err(GeodataError::Transport(
                "no geodata endpoints configured".to_string(),
            ));
        }
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let query = build_query(self.config.bbox);
        let mut last = None;

        for attempt in 0..max_attempts {
            let endpoint = &self.config.endpoints[attempt as usize % self.config.endpoints.len()];
            let (error, backoff) = match self.transport.post(endpoint, &query).await {
                Ok(resp) if resp.status == 429 => (GeodataError::RateLimited, policy.rate_limit_backoff),
                Ok(resp) if !(200..300).contains(&resp.status) => {
                    (GeodataError::Status(resp.status), policy.status_backoff)
                }
                Ok(resp) => match parse_map_data(&resp.body) {
                    Ok(data) => {
                        log::info!(
                            "grid loaded from {}: {} signals, {} roads",
                            endpoint,
                            data.signals.len(),
                            data.roads.len()
                        );
                        return Ok(data);
                    }
                    Err(e) => (e, policy.transport_backoff),
                },
                Err(e) => (e, policy.transport_backoff),
            };

            log::warn!(
                "geodata attempt {}/{} via {} failed: {}",
                attempt + 1,
                max_attempts,
                endpoint,
                error
            );
            last = Some(error);
            if attempt + 1 < max_attempts {
                tokio::time::sleep(backoff).await;
            }
        }

        Err(GeodataError::RetriesExhausted {
            attempts: max_attempts,
            last: Box::new(last.unwrap_or(GeodataError::Transport("no attempt made".to_string()))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const GRID: &str = r#"{"elements": [
        {"type": "node", "id": 101, "lat": 45.40, "lon": -75.70, "tags": {"highway": "traffic_signals"}},
        {"type": "node", "id": 102, "lat": 45.41, "lon": -75.71, "tags": {"highway": "crossing"}},
        {"type": "node", "id": 103, "tags": {"highway": "traffic_signals"}},
        {"type": "node", "id": 104, "lat": 45.42, "lon": -75.69},
        {"type": "way", "id": 9, "tags": {"highway": "primary", "name": "Carling Avenue"},
         "geometry": [{"lat": 45.39, "lon": -75.72}, null, {"lat": 45.40, "lon": -75.70}]},
        {"type": "way", "id": 10, "tags": {"building": "yes"}}
    ]}"#;

    struct FakeTransport {
        responses: Mutex<VecDeque<Result<TransportResponse, GeodataError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn new(responses: Vec<Result<TransportResponse, GeodataError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl OverpassTransport for FakeTransport {
        async fn post(&self, endpoint: &str, _query: &str) -> Result<TransportResponse, GeodataError> {
            self.calls.lock().unwrap().push(endpoint.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(GeodataError::Transport("script exhausted".to_string())))
        }
    }

    fn status(code: u16) -> Result<TransportResponse, GeodataError> {
        Ok(TransportResponse {
            status: code,
            body: Vec::new(),
        })
    }

    fn grid() -> Result<TransportResponse, GeodataError> {
        Ok(TransportResponse {
            status: 200,
            body: GRID.as_bytes().to_vec(),
        })
    }

    fn config(policy: RetryPolicy) -> GeodataConfig {
        GeodataConfig {
            endpoints: vec!["m0".into(), "m1".into(), "m2".into()],
            retry: policy,
            ..GeodataConfig::default()
        }
    }

    #[test]
    fn parses_signals_and_roads() {
        let data = parse_map_data(GRID.as_bytes()).unwrap();
        assert_eq!(data.signals.len(), 1);
        assert_eq!(data.signals[0].id.as_str(), "101");
        assert_eq!(data.roads.len(), 1);
        assert_eq!(data.roads[0].name.as_deref(), Some("Carling Avenue"));
        assert_eq!(data.roads[0].geometry.len(), 2);
    }

    #[test]
    fn missing_elements_is_invalid() {
        assert!(matches!(
            parse_map_data(br#"{"remark": "runtime error"}"#),
            Err(GeodataError::InvalidFormat(_))
        ));
    }

    #[test]
    fn query_covers_signals_and_roads_in_bbox() {
        let query = build_query([45.385, -75.73, 45.435, -75.67]);
        assert!(query.contains("node[\"highway\"=\"traffic_signals\"](45.3850,-75.7300,45.4350,-75.6700)"));
        assert!(query.contains("primary|secondary|residential"));
        assert!(query.trim_end().ends_with("out geom;"));
    }

    #[tokio::test]
    async fn rate_limits_rotate_mirrors_until_budget_is_spent() {
        let transport = FakeTransport::new(vec![status(429), status(429), status(429), grid()]);
        let gateway = OverpassGateway::new(transport, config(RetryPolicy::immediate(3)));

        let err = gateway.fetch_map_data().await.unwrap_err();
        match err {
            GeodataError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, GeodataError::RateLimited));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(gateway.transport.calls(), vec!["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn recovers_on_the_next_mirror() {
        let transport = FakeTransport::new(vec![status(503), grid()]);
        let gateway = OverpassGateway::new(transport, config(RetryPolicy::immediate(3)));

        let data = gateway.fetch_map_data().await.unwrap();
        assert_eq!(data.signals.len(), 1);
        assert_eq!(gateway.transport.calls(), vec!["m0", "m1"]);
    }

    #[tokio::test]
    async fn malformed_body_and_transport_errors_are_retried() {
        let bad_body = Ok(TransportResponse {
            status: 200,
            body: b"<html>busy</html>".to_vec(),
        });
        let transport = FakeTransport::new(vec![
            bad_body,
            Err(GeodataError::Transport("connection reset".into())),
            grid(),
        ]);
        let gateway = OverpassGateway::new(transport, config(RetryPolicy::immediate(3)));
        assert!(gateway.fetch_map_data().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_the_longer_backoff() {
        let transport = FakeTransport::new(vec![status(429), status(500), grid()]);
        let gateway = OverpassGateway::new(transport, config(RetryPolicy::default()));

        let started = tokio::time::Instant::now();
        gateway.fetch_map_data().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn error_message_names_attempts_and_cause() {
        let transport = FakeTransport::new(vec![status(500), status(502)]);
        let gateway = OverpassGateway::new(transport, config(RetryPolicy::immediate(2)));
        let message = gateway.fetch_map_data().await.unwrap_err().to_string();
        assert_eq!(
            message,
            "geodata fetch failed after 2 attempts: geodata service returned status 502"
        );
    }
}
