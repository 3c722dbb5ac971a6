use thiserror::Error;

/// Failures talking to the geodata (Overpass) mirrors.
#[derive(Debug, Error)]
pub enum GeodataError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("geodata service returned status {0}")]
    Status(u16),

    #[error("geodata service is rate limiting requests")]
    RateLimited,

    #[error("invalid data format received from geodata service: {0}")]
    InvalidFormat(String),

    #[error("geodata fetch failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<GeodataError> },
}

/// Failures obtaining or validating a mission plan.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("no planner API key configured (set GEMINI_API_KEY or API_KEY)")]
    MissingApiKey,

    #[error("planning service unreachable: {0}")]
    Transport(String),

    #[error("planning service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("planning service returned no content")]
    EmptyResponse,

    #[error("mission plan rejected: {0}")]
    Schema(String),
}

/// Failures of the publish/subscribe transport.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("broker error: {0}")]
    Broker(#[from] amiquip::Error),

    #[error("message bus is not connected")]
    NotConnected,

    #[error("malformed message on {topic}: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}
