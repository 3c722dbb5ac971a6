use std::error::Error;
use std::path::Path;

use plotters::prelude::*;

use crate::geodata::Road;
use crate::orchestration::mission_plan::PlannedSignal;
use crate::shared_data::LatLon;
use crate::simulation_engine::intersections::LightState;

/// A live signal as drawn on the map.
#[derive(Debug, Clone, Copy)]
pub struct SignalMarker {
    pub position: LatLon,
    pub phase: LightState,
    pub overridden: bool,
}

/// Everything the snapshot draws. Built by the dashboard from its state.
#[derive(Debug, Clone)]
pub struct MapSnapshot<'a> {
    /// South, west, north, east.
    pub bbox: [f64; 4],
    pub roads: &'a [Road],
    pub route: &'a [LatLon],
    pub planned: &'a [PlannedSignal],
    pub signals: Vec<SignalMarker>,
    pub ambulance: Option<LatLon>,
    pub live_position: Option<LatLon>,
}

const WIDTH: u32 = 1000;
const HEIGHT: u32 = 800;
const ROAD_COLOR: RGBColor = RGBColor(150, 150, 150);
const ROUTE_COLOR: RGBColor = RGBColor(30, 90, 220);
const PLANNED_COLOR: RGBColor = RGBColor(0, 160, 160);

fn phase_color(phase: LightState) -> RGBColor {
    match phase {
        LightState::Green => RGBColor(0, 200, 0),
        LightState::Yellow => RGBColor(240, 200, 0),
        LightState::Red => RGBColor(220, 0, 0),
    }
}

// Drawing area in (lon, lat): the grid bbox widened to include the route.
fn bounds(snapshot: &MapSnapshot<'_>) -> ((f64, f64), (f64, f64)) {
    let [mut south, mut west, mut north, mut east] = snapshot.bbox;
    for p in snapshot.route.iter().chain(snapshot.ambulance.iter()) {
        south = south.min(p.lat);
        north = north.max(p.lat);
        west = west.min(p.lon);
        east = east.max(p.lon);
    }
    ((west, east), (south, north))
}

/// Renders the grid, route and signal states to a PNG at `path`.
pub fn render_snapshot(path: &Path, snapshot: &MapSnapshot<'_>) -> Result<(), Box<dyn Error>> {
    let ((west, east), (south, north)) = bounds(snapshot);

    let backend = BitMapBackend::new(path, (WIDTH, HEIGHT));
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(west..east, south..north)?;

    for road in snapshot.roads {
        chart.draw_series(LineSeries::new(
            road.geometry.iter().map(|p| (p.lon, p.lat)),
            ROAD_COLOR.stroke_width(1),
        ))?;
    }

    if !snapshot.route.is_empty() {
        chart.draw_series(LineSeries::new(
            snapshot.route.iter().map(|p| (p.lon, p.lat)),
            ROUTE_COLOR.stroke_width(4),
        ))?;
    }

    chart.draw_series(snapshot.planned.iter().map(|s| {
        Circle::new((s.position.lon, s.position.lat), 8, PLANNED_COLOR.stroke_width(2))
    }))?;

    chart.draw_series(snapshot.signals.iter().map(|s| {
        Circle::new(
            (s.position.lon, s.position.lat),
            4,
            phase_color(s.phase).filled(),
        )
    }))?;
    chart.draw_series(snapshot.signals.iter().filter(|s| s.overridden).map(|s| {
        Circle::new((s.position.lon, s.position.lat), 10, MAGENTA.stroke_width(3))
    }))?;

    if let Some(live) = snapshot.live_position {
        chart.draw_series(std::iter::once(Circle::new(
            (live.lon, live.lat),
            6,
            BLACK.stroke_width(2),
        )))?;
    }
    if let Some(unit) = snapshot.ambulance {
        chart.draw_series(std::iter::once(Circle::new(
            (unit.lon, unit.lat),
            7,
            RED.filled(),
        )))?;
    }

    root.present()?;
    log::info!("grid snapshot saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global_variables::GRID_BBOX;

    #[test]
    fn bounds_include_route_outside_the_grid() {
        let route = [LatLon::new(45.50, -75.80), LatLon::new(45.40, -75.70)];
        let snapshot = MapSnapshot {
            bbox: GRID_BBOX,
            roads: &[],
            route: &route,
            planned: &[],
            signals: Vec::new(),
            ambulance: None,
            live_position: None,
        };
        let ((west, east), (south, north)) = bounds(&snapshot);
        assert_eq!(west, -75.80);
        assert_eq!(east, GRID_BBOX[3]);
        assert_eq!(south, GRID_BBOX[0]);
        assert_eq!(north, 45.50);
    }

    #[test]
    fn writes_png_snapshot() {
        let roads = vec![Road {
            id: 1,
            highway: "primary".to_string(),
            name: Some("Rideau Street".to_string()),
            geometry: vec![LatLon::new(45.41, -75.72), LatLon::new(45.42, -75.69)],
        }];
        let route = vec![LatLon::new(45.40, -75.72), LatLon::new(45.425, -75.69)];
        let snapshot = MapSnapshot {
            bbox: GRID_BBOX,
            roads: &roads,
            route: &route,
            planned: &[],
            signals: vec![
                SignalMarker {
                    position: LatLon::new(45.41, -75.71),
                    phase: LightState::Red,
                    overridden: false,
                },
                SignalMarker {
                    position: LatLon::new(45.415, -75.70),
                    phase: LightState::Green,
                    overridden: true,
                },
            ],
            ambulance: Some(route[0]),
            live_position: None,
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.png");
        render_snapshot(&path, &snapshot).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
