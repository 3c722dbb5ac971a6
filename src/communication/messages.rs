use serde::{Deserialize, Serialize};

use crate::error::BusError;
use crate::global_variables::{
    DEFAULT_EXTENSION_SECS, MAX_EXTENSION_SECS, TOPIC_AMBULANCE_LOCATION,
    TOPIC_SIGNAL_COMMAND_PREFIX,
};
use crate::orchestration::mission_plan::SignalCommandKind;
use crate::shared_data::LatLon;
use crate::simulation_engine::intersections::IntersectionId;

/// Live fix published by the ambulance unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbulanceLocation {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub source: String,
}

impl AmbulanceLocation {
    pub fn position(&self) -> LatLon {
        LatLon::new(self.lat, self.lon)
    }
}

/// Preemption command issued by the traffic decision agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalCommand {
    pub intersection_id: IntersectionId,
    pub command: Option<SignalCommandKind>,
    pub target_position: Option<[f64; 2]>,
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub source: String,
}

impl SignalCommand {
    /// Extension in whole seconds; absent, zero, negative or non-finite
    /// durations fall back to the default extension and long ones are capped
    /// at `MAX_EXTENSION_SECS`.
    pub fn extension_seconds(&self) -> u64 {
        match self.duration_seconds {
            Some(d) if d.is_finite() && d >= 1.0 => {
                d.min(MAX_EXTENSION_SECS as f64).round() as u64
            }
            _ => DEFAULT_EXTENSION_SECS,
        }
    }
}

/// Decoded inbound traffic, keyed by topic.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshMessage {
    Location(AmbulanceLocation),
    SignalCommand(SignalCommand),
    Other { topic: String },
}

impl MeshMessage {
    pub fn decode(topic: &str, payload: &[u8]) -> Result<Self, BusError> {
        let malformed = |source| BusError::Malformed {
            topic: topic.to_string(),
            source,
        };
        if topic == TOPIC_AMBULANCE_LOCATION {
            serde_json::from_slice(payload)
                .map(MeshMessage::Location)
                .map_err(malformed)
        } else if topic.starts_with(TOPIC_SIGNAL_COMMAND_PREFIX) {
            serde_json::from_slice(payload)
                .map(MeshMessage::SignalCommand)
                .map_err(malformed)
        } else {
            Ok(MeshMessage::Other {
                topic: topic.to_string(),
            })
        }
    }
}

/// Routing key for commands aimed at one intersection.
pub fn signal_command_topic(id: &IntersectionId) -> String {
    format!("{}{}", TOPIC_SIGNAL_COMMAND_PREFIX, id)
}

/// AMQP topic-exchange matching: words are dot separated, `*` matches one
/// word and `#` matches zero or more.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    fn matches(pattern: &[&str], topic: &[&str]) -> bool {
        match (pattern.first(), topic.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], topic) || (!topic.is_empty() && matches(pattern, &topic[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &topic[1..]),
            (Some(p), Some(t)) if p == t => matches(&pattern[1..], &topic[1..]),
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let topic: Vec<&str> = topic.split('.').collect();
    matches(&pattern, &topic)
}
