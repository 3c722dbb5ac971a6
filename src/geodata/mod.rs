pub mod overpass;

pub use overpass::{
    build_query, parse_map_data, MapData, OverpassGateway, OverpassTransport, ReqwestTransport,
    Road, SignalSite, TransportResponse,
};

/// Load state of the city grid as shown to the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum GridStatus {
    Connecting,
    Active { signals: usize, roads: usize },
    Offline(String),
}

impl GridStatus {
    pub fn label(&self) -> String {
        match self {
            GridStatus::Connecting => "CONNECTING...".to_string(),
            GridStatus::Active { signals, roads } => {
                format!("MESH ACTIVE ({} signals, {} roads)", signals, roads)
            }
            GridStatus::Offline(reason) => format!("GRID OFFLINE: {} (retry available)", reason),
        }
    }
}
