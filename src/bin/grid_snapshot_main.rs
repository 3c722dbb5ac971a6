// grid_snapshot_main.rs
//
// Fetches the city grid once and renders it to a PNG without starting the
// dashboard.

use sam_grid_control::config::DashboardConfig;
use sam_grid_control::geodata::OverpassGateway;
use sam_grid_control::monitoring::map_render::{render_snapshot, MapSnapshot, SignalMarker};
use sam_grid_control::simulation_engine::intersections::IntersectionSignal;
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let config = DashboardConfig::from_env();

    println!("Fetching city grid...");
    let gateway = OverpassGateway::from_config(config.geodata.clone())?;
    let map = gateway.fetch_map_data().await?;
    println!("{} signals, {} roads", map.signals.len(), map.roads.len());

    // Show the staggered starting phases the engine would use.
    let signals = map
        .signals
        .iter()
        .enumerate()
        .map(|(index, site)| {
            let signal = IntersectionSignal::new(site.id.clone(), site.position, index);
            SignalMarker {
                position: signal.position,
                phase: signal.sequence_phase(),
                overridden: false,
            }
        })
        .collect();

    let snapshot = MapSnapshot {
        bbox: config.geodata.bbox,
        roads: &map.roads,
        route: &[],
        planned: &[],
        signals,
        ambulance: None,
        live_position: None,
    };
    render_snapshot(&config.snapshot_path, &snapshot)?;
    println!("Grid snapshot saved to {}", config.snapshot_path.display());
    Ok(())
}
