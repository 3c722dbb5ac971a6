// planner.rs
//
// Client for the generative route-planning service. The service receives a
// prompt plus a JSON response schema and answers with the mission JSON as
// the text of its first candidate.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::PlannerConfig;
use crate::error::PlanningError;
use crate::orchestration::mission_plan::{parse_mission_response, MissionResponse};

/// Anything that can turn an origin/destination pair into a mission.
pub trait RoutePlanner: Send + Sync {
    fn plan(
        &self,
        origin: &str,
        destination: &str,
    ) -> impl Future<Output = Result<MissionResponse, PlanningError>> + Send;
}

pub struct GeminiPlanner {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiPlanner {
    pub fn new(config: &PlannerConfig) -> Result<Self, PlanningError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PlanningError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self) -> String {
        format!("{}/{}:generateContent", self.endpoint, self.model)
    }
}

impl RoutePlanner for GeminiPlanner {
    async fn plan(&self, origin: &str, destination: &str) -> Result<MissionResponse, PlanningError> {
        let api_key = self.api_key.as_deref().ok_or(PlanningError::MissingApiKey)?;
        let body = build_request(origin, destination);

        log::info!("requesting route plan {} -> {} from {}", origin, destination, self.model);
        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PlanningError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("planning service error {}: {}", status, body);
            return Err(PlanningError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| PlanningError::Schema(format!("unreadable planner reply: {}", e)))?;
        let text = reply.first_text().ok_or(PlanningError::EmptyResponse)?;
        parse_mission_response(text)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn first_text(&self) -> Option<&str> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .find_map(|p| p.text.as_deref())
            .filter(|t| !t.trim().is_empty())
    }
}

pub fn build_prompt(origin: &str, destination: &str) -> String {
    format!(
        "You are the SAM Orchestrator. Direct an ambulance from {origin} to {destination} in Ottawa.\n\n\
         Output a JSON object with:\n\
         1. simulation: totalDistanceMeters, totalTimeSeconds, segments (array), polyline (coord array).\n\
         2. signals: array of preemption intersections along the route with traffic_light_id, lat, lon.\n\n\
         Rules:\n\
         - Segments MUST include street name, start/end [lat, lon], and length.\n\
         - Speed ~70km/h.\n\
         - Segments are sequential."
    )
}

fn number() -> Value {
    json!({ "type": "NUMBER" })
}

fn coordinate() -> Value {
    json!({ "type": "ARRAY", "items": number() })
}

/// JSON schema the service is asked to answer with.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "simulation": {
                "type": "OBJECT",
                "properties": {
                    "route": {
                        "type": "OBJECT",
                        "properties": {
                            "totalDistanceMeters": number(),
                            "totalTimeSeconds": number(),
                            "segments": {
                                "type": "ARRAY",
                                "items": {
                                    "type": "OBJECT",
                                    "properties": {
                                        "street": { "type": "STRING" },
                                        "start": coordinate(),
                                        "end": coordinate(),
                                        "lengthMeters": number(),
                                        "expectedTimeSeconds": number(),
                                        "arrivalTimestamp": number()
                                    }
                                }
                            }
                        }
                    },
                    "polyline": { "type": "ARRAY", "items": coordinate() },
                    "startTimestamp": number()
                }
            },
            "signals": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "traffic_light_id": number(),
                        "lat": number(),
                        "lon": number(),
                        "duration_seconds": number()
                    }
                }
            }
        }
    })
}

pub fn build_request(origin: &str, destination: &str) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": build_prompt(origin, destination) }] }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerConfig;

    #[test]
    fn request_carries_prompt_and_schema() {
        let body = build_request("Civic Hospital, Ottawa", "Rideau St");
        let text = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(text.contains("from Civic Hospital, Ottawa to Rideau St"));
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        let sim = &body["generationConfig"]["responseSchema"]["properties"]["simulation"];
        assert_eq!(sim["properties"]["polyline"]["type"], "ARRAY");
    }

    #[test]
    fn first_candidate_text_is_extracted() {
        let reply: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "{\"a\": 1}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(reply.first_text(), Some("{\"a\": 1}"));

        let empty: GenerateContentResponse = serde_json::from_str(r#"{"candidates": []}"#).unwrap();
        assert_eq!(empty.first_text(), None);
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let config = PlannerConfig {
            api_key: None,
            ..PlannerConfig::default()
        };
        let planner = GeminiPlanner::new(&config).unwrap();
        assert!(matches!(
            planner.plan("a", "b").await,
            Err(PlanningError::MissingApiKey)
        ));
    }

    #[test]
    fn url_targets_the_configured_model() {
        let config = PlannerConfig {
            endpoint: "https://example.test/v1beta/models/".to_string(),
            model: "flash".to_string(),
            ..PlannerConfig::default()
        };
        let planner = GeminiPlanner::new(&config).unwrap();
        assert_eq!(planner.url(), "https://example.test/v1beta/models/flash:generateContent");
    }
}
