// config.rs
//
// Runtime settings. Every value has a default in `global_variables`; the
// environment overrides it (SAM_* variables, plus GEMINI_API_KEY / API_KEY
// for the planner).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::global_variables::{
    AMQP_URL, DEFAULT_DESTINATION, DEFAULT_ORIGIN, GEODATA_MAX_ATTEMPTS, GEODATA_TIMEOUT_SECS,
    GRID_BBOX, MAP_SNAPSHOT_PNG, MESH_EXCHANGE, MISSION_LOG_CSV, OVERPASS_ENDPOINTS,
    PLANNER_ENDPOINT, PLANNER_MODEL, PLANNER_TIMEOUT_SECS, RECONNECT_PERIOD_SECS,
};

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub amqp_url: String,
    pub exchange: String,
    pub reconnect_period: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            amqp_url: AMQP_URL.to_string(),
            exchange: MESH_EXCHANGE.to_string(),
            reconnect_period: Duration::from_secs(RECONNECT_PERIOD_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            endpoint: PLANNER_ENDPOINT.to_string(),
            model: PLANNER_MODEL.to_string(),
            api_key: None,
            timeout_secs: PLANNER_TIMEOUT_SECS,
        }
    }
}

/// Backoff schedule for the geodata mirrors. Every attempt, whatever the
/// failure, counts against `max_attempts`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_backoff: Duration,
    pub status_backoff: Duration,
    pub transport_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: GEODATA_MAX_ATTEMPTS,
            rate_limit_backoff: Duration::from_millis(2000),
            status_backoff: Duration::from_millis(1000),
            transport_backoff: Duration::from_millis(1500),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            rate_limit_backoff: Duration::ZERO,
            status_backoff: Duration::ZERO,
            transport_backoff: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeodataConfig {
    pub endpoints: Vec<String>,
    /// South, west, north, east.
    pub bbox: [f64; 4],
    pub retry: RetryPolicy,
    pub timeout_secs: u64,
}

impl Default for GeodataConfig {
    fn default() -> Self {
        Self {
            endpoints: OVERPASS_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            bbox: GRID_BBOX,
            retry: RetryPolicy::default(),
            timeout_secs: GEODATA_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub bus: BusConfig,
    pub planner: PlannerConfig,
    pub geodata: GeodataConfig,
    pub origin: String,
    pub destination: String,
    pub log_csv_path: PathBuf,
    pub snapshot_path: PathBuf,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            planner: PlannerConfig::default(),
            geodata: GeodataConfig::default(),
            origin: DEFAULT_ORIGIN.to_string(),
            destination: DEFAULT_DESTINATION.to_string(),
            log_csv_path: PathBuf::from(MISSION_LOG_CSV),
            snapshot_path: PathBuf::from(MAP_SNAPSHOT_PNG),
        }
    }
}

impl DashboardConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("SAM_AMQP_URL") {
            config.bus.amqp_url = url;
        }
        if let Some(exchange) = get("SAM_EXCHANGE") {
            config.bus.exchange = exchange;
        }
        if let Some(secs) = get("SAM_RECONNECT_SECS").and_then(|v| v.parse().ok()) {
            config.bus.reconnect_period = Duration::from_secs(secs);
        }

        if let Some(endpoint) = get("SAM_PLANNER_ENDPOINT") {
            config.planner.endpoint = endpoint;
        }
        if let Some(model) = get("SAM_PLANNER_MODEL") {
            config.planner.model = model;
        }
        config.planner.api_key = get("GEMINI_API_KEY").or_else(|| get("API_KEY"));

        if let Some(list) = get("SAM_OVERPASS_ENDPOINTS") {
            let endpoints: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !endpoints.is_empty() {
                config.geodata.endpoints = endpoints;
            }
        }
        if let Some(attempts) = get("SAM_GEODATA_ATTEMPTS").and_then(|v| v.parse().ok()) {
            config.geodata.retry.max_attempts = attempts;
        }

        if let Some(origin) = get("SAM_ORIGIN") {
            config.origin = origin;
        }
        if let Some(destination) = get("SAM_DESTINATION") {
            config.destination = destination;
        }
        if let Some(path) = get("SAM_LOG_CSV") {
            config.log_csv_path = PathBuf::from(path);
        }
        if let Some(path) = get("SAM_SNAPSHOT_PNG") {
            config.snapshot_path = PathBuf::from(path);
        }
        config
    }
}
