// preemption_publisher_main.rs
//
// Publishes one preemption command (or an ambulance fix) to the mesh.
//
//   preemption_publisher_main <intersection-id> [duration-seconds]
//   preemption_publisher_main --location <lat> <lon> [heading] [speed]

use sam_grid_control::communication::amqp::publish_once;
use sam_grid_control::communication::messages::{signal_command_topic, AmbulanceLocation, SignalCommand};
use sam_grid_control::config::DashboardConfig;
use sam_grid_control::global_variables::TOPIC_AMBULANCE_LOCATION;
use sam_grid_control::orchestration::mission_plan::SignalCommandKind;
use std::error::Error;

fn parse_f64(args: &[String], index: usize, name: &str) -> Result<Option<f64>, Box<dyn Error>> {
    match args.get(index) {
        Some(raw) => Ok(Some(raw.parse().map_err(|_| format!("invalid {}: {}", name, raw))?)),
        None => Ok(None),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let config = DashboardConfig::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();

    let (topic, payload) = match args.first().map(String::as_str) {
        Some("--location") => {
            let lat = parse_f64(&args, 1, "latitude")?.ok_or("missing latitude")?;
            let lon = parse_f64(&args, 2, "longitude")?.ok_or("missing longitude")?;
            let fix = AmbulanceLocation {
                lat,
                lon,
                heading: parse_f64(&args, 3, "heading")?.unwrap_or(0.0),
                speed: parse_f64(&args, 4, "speed")?.unwrap_or(0.0),
                source: "preemption_publisher".to_string(),
            };
            (TOPIC_AMBULANCE_LOCATION.to_string(), serde_json::to_vec(&fix)?)
        }
        Some(id) => {
            let command = SignalCommand {
                intersection_id: id.into(),
                command: Some(SignalCommandKind::ExtendGreen),
                target_position: None,
                duration_seconds: parse_f64(&args, 1, "duration")?,
                source: "preemption_publisher".to_string(),
            };
            (
                signal_command_topic(&command.intersection_id),
                serde_json::to_vec(&command)?,
            )
        }
        None => {
            eprintln!("usage: preemption_publisher_main <intersection-id> [duration-seconds]");
            eprintln!("       preemption_publisher_main --location <lat> <lon> [heading] [speed]");
            std::process::exit(2);
        }
    };

    publish_once(&config.bus, &topic, &payload)?;
    println!("Published to {} on {}", topic, config.bus.exchange);
    Ok(())
}
