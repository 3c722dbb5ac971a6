// main.rs
use sam_grid_control::communication::amqp::AmqpBus;
use sam_grid_control::config::DashboardConfig;
use sam_grid_control::dashboard::run_dashboard;
use sam_grid_control::geodata::OverpassGateway;
use sam_grid_control::orchestration::planner::GeminiPlanner;
use std::error::Error;
use std::io::IsTerminal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = DashboardConfig::from_env();
    if config.planner.api_key.is_none() {
        log::warn!("no planner API key set; missions will abort until GEMINI_API_KEY is provided");
    }
    println!("Starting SAM Grid Control...");

    let planner = GeminiPlanner::new(&config.planner)?;
    let gateway = OverpassGateway::from_config(config.geodata.clone())?;
    let bus = AmqpBus::new(config.bus.clone());
    let interactive = std::io::stdin().is_terminal();

    run_dashboard(config, planner, gateway, bus, interactive).await
}
