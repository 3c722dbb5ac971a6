use crate::global_variables::{GREEN_SECS, RED_SECS, YELLOW_SECS};
use crate::shared_data::LatLon;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

/// Opaque intersection key. Upstream sources send either numbers or strings,
/// both are normalised to their string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IntersectionId(pub String);

impl IntersectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IntersectionId {
    fn from(s: &str) -> Self {
        IntersectionId(s.to_string())
    }
}

impl From<String> for IntersectionId {
    fn from(s: String) -> Self {
        IntersectionId(s)
    }
}

impl From<u64> for IntersectionId {
    fn from(n: u64) -> Self {
        IntersectionId(n.to_string())
    }
}

impl<'de> Deserialize<'de> for IntersectionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Float(f64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(n) => IntersectionId(n.to_string()),
            // Large OSM ids can arrive as floats from loosely typed producers.
            RawId::Float(f) if f.fract() == 0.0 => IntersectionId(format!("{:.0}", f)),
            RawId::Float(f) => IntersectionId(f.to_string()),
            RawId::Text(s) => IntersectionId(s),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightState {
    Green,
    Yellow,
    Red,
}

/// The autonomous cycle, indexed by `IntersectionSignal::sequence_index`.
pub const PHASE_SEQUENCE: [LightState; 3] = [LightState::Green, LightState::Yellow, LightState::Red];

impl LightState {
    /// Nominal hold for this phase when no override is active.
    pub fn nominal_hold(self) -> Duration {
        match self {
            LightState::Green => Duration::from_secs(GREEN_SECS),
            LightState::Yellow => Duration::from_secs(YELLOW_SECS),
            LightState::Red => Duration::from_secs(RED_SECS),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LightState::Green => "green",
            LightState::Yellow => "yellow",
            LightState::Red => "red",
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the live override table. Entries are deactivated, never
/// removed, once their window closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalOverride {
    pub active: bool,
    pub activated_at_epoch_ms: u64,
    pub extension_seconds: u64,
    /// Increments on every activation so a late clear for an older
    /// activation can be told apart from the current one.
    pub activation: u64,
}

/// A traffic signal discovered in the geodata.
#[derive(Debug, Clone)]
pub struct IntersectionSignal {
    pub id: IntersectionId,
    pub position: LatLon,
    /// Phase currently displayed.
    pub phase: LightState,
    /// Position in `PHASE_SEQUENCE` of the autonomous cycle. Not advanced
    /// while the intersection is held green by an override.
    pub sequence_index: usize,
    /// True while the displayed green is forced by an override.
    pub forced: bool,
}

impl IntersectionSignal {
    /// Creates a signal whose cycle starts `offset` steps into the sequence.
    pub fn new(id: IntersectionId, position: LatLon, offset: usize) -> Self {
        let sequence_index = offset % PHASE_SEQUENCE.len();
        Self {
            id,
            position,
            phase: PHASE_SEQUENCE[sequence_index],
            sequence_index,
            forced: false,
        }
    }

    /// Phase the autonomous cycle would show right now.
    pub fn sequence_phase(&self) -> LightState {
        PHASE_SEQUENCE[self.sequence_index]
    }
}
