// mission_plan.rs
//
// Wire schema of the planning service and its validation into a
// `MissionPlan`. The raw structs mirror the JSON exactly; everything past
// `parse_mission_response` works with validated types only.

use crate::error::PlanningError;
use crate::shared_data::LatLon;
use crate::simulation_engine::intersections::IntersectionId;
use serde::{Deserialize, Serialize};

// Largest time value, in seconds, accepted from the planner.
const MAX_PLAN_SECONDS: f64 = 1e12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionLevel {
    Low,
    Moderate,
    Heavy,
    Jammed,
}

/// Command verbs a preemption can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalCommandKind {
    Green,
    HoldGreen,
    ExtendGreen,
    Extend,
    Hold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteSegment {
    pub street: String,
    pub start: Option<LatLon>,
    pub end: Option<LatLon>,
    pub length_meters: f64,
    pub expected_time_seconds: f64,
    pub arrival_timestamp: f64,
    pub congestion: Option<CongestionLevel>,
    pub confidence: Option<f64>,
}

/// A validated, immutable route plan. A new mission replaces it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionPlan {
    pub total_distance_meters: f64,
    pub total_duration_seconds: f64,
    pub segments: Vec<RouteSegment>,
    /// Never empty.
    pub polyline: Vec<LatLon>,
    pub start_timestamp: i64,
}

impl MissionPlan {
    pub fn distance_km(&self) -> f64 {
        self.total_distance_meters / 1000.0
    }
}

/// An intersection the planner expects to preempt along the route.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSignal {
    pub id: IntersectionId,
    pub position: LatLon,
    pub duration_seconds: Option<f64>,
    pub command: Option<SignalCommandKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissionResponse {
    pub plan: MissionPlan,
    pub signals: Vec<PlannedSignal>,
}

// ---------------------------------------------------------------------------
// Raw wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawMissionResponse {
    simulation: Option<RawSimulation>,
    #[serde(default)]
    signals: Vec<RawSignal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSimulation {
    route: Option<RawRoute>,
    #[serde(default)]
    polyline: Vec<[f64; 2]>,
    start_timestamp: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRoute {
    #[serde(default)]
    total_distance_meters: f64,
    #[serde(default)]
    total_time_seconds: f64,
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSegment {
    #[serde(default)]
    street: String,
    start: Option<[f64; 2]>,
    end: Option<[f64; 2]>,
    #[serde(default)]
    length_meters: f64,
    #[serde(default)]
    expected_time_seconds: f64,
    #[serde(default)]
    arrival_timestamp: f64,
    congestion: Option<CongestionLevel>,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSignal {
    traffic_light_id: IntersectionId,
    lat: f64,
    lon: f64,
    duration_seconds: Option<f64>,
    command: Option<SignalCommandKind>,
}

/// Parses and validates the planning service's JSON text.
pub fn parse_mission_response(text: &str) -> Result<MissionResponse, PlanningError> {
    let raw: RawMissionResponse = serde_json::from_str(text.trim())
        .map_err(|e| PlanningError::Schema(format!("invalid mission JSON: {}", e)))?;

    let simulation = raw
        .simulation
        .ok_or_else(|| PlanningError::Schema("missing simulation".to_string()))?;
    let route = simulation
        .route
        .ok_or_else(|| PlanningError::Schema("missing simulation.route".to_string()))?;
    if simulation.polyline.is_empty() {
        return Err(PlanningError::Schema("empty polyline".to_string()));
    }
    let start_timestamp = simulation.start_timestamp.unwrap_or(0.0);
    if !in_plan_range(start_timestamp) {
        return Err(PlanningError::Schema("startTimestamp out of range".to_string()));
    }
    if !in_plan_range(route.total_time_seconds) {
        return Err(PlanningError::Schema("totalTimeSeconds out of range".to_string()));
    }

    let segments = route
        .segments
        .into_iter()
        .map(|s| RouteSegment {
            street: s.street,
            start: s.start.map(LatLon::from),
            end: s.end.map(LatLon::from),
            length_meters: s.length_meters,
            expected_time_seconds: s.expected_time_seconds,
            arrival_timestamp: s.arrival_timestamp,
            congestion: s.congestion,
            confidence: s.confidence,
        })
        .collect();

    let plan = MissionPlan {
        total_distance_meters: route.total_distance_meters,
        total_duration_seconds: route.total_time_seconds,
        segments,
        polyline: simulation.polyline.into_iter().map(LatLon::from).collect(),
        start_timestamp: start_timestamp.round() as i64,
    };

    let signals = raw
        .signals
        .into_iter()
        .map(|s| PlannedSignal {
            id: s.traffic_light_id,
            position: LatLon::new(s.lat, s.lon),
            duration_seconds: s.duration_seconds,
            command: s.command,
        })
        .collect();

    Ok(MissionResponse { plan, signals })
}

fn in_plan_range(seconds: f64) -> bool {
    seconds.is_finite() && seconds.abs() <= MAX_PLAN_SECONDS
}
