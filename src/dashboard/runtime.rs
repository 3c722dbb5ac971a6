// runtime.rs
//
// Event loop: owns the queue, feeds events to the dashboard one at a time
// and carries out the effects it asks for.

use std::error::Error;
use std::sync::Arc;

use tokio::sync::mpsc::unbounded_channel;

use crate::communication::bus::{BusEventSink, MessageBus};
use crate::config::DashboardConfig;
use crate::dashboard::app::{Dashboard, DashboardEvent, Effect};
use crate::dashboard::console;
use crate::engine::scheduler::TokioScheduler;
use crate::geodata::{OverpassGateway, OverpassTransport};
use crate::global_variables::{TOPIC_AMBULANCE_LOCATION, TOPIC_SIGNAL_COMMAND_ALL};
use crate::orchestration::planner::RoutePlanner;

/// Runs the dashboard until the operator quits or Ctrl-C is pressed.
pub async fn run_dashboard<P, T, B>(
    config: DashboardConfig,
    planner: P,
    gateway: OverpassGateway<T>,
    mut bus: B,
    interactive: bool,
) -> Result<(), Box<dyn Error>>
where
    P: RoutePlanner + 'static,
    T: OverpassTransport + 'static,
    B: MessageBus,
{
    let (events, mut queue) = unbounded_channel::<DashboardEvent>();
    let mut dashboard = Dashboard::new(config, TokioScheduler::new(events.clone()));
    let planner = Arc::new(planner);
    let gateway = Arc::new(gateway);

    let bus_events = events.clone();
    let sink: BusEventSink = Arc::new(move |event| {
        let _ = bus_events.send(DashboardEvent::Bus(event));
    });
    let connected = bus
        .subscribe(TOPIC_AMBULANCE_LOCATION)
        .and_then(|_| bus.subscribe(TOPIC_SIGNAL_COMMAND_ALL))
        .and_then(|_| bus.connect(sink));
    if let Err(e) = connected {
        dashboard.record_bus_failure(&e);
    }

    let shutdown = events.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(DashboardEvent::Shutdown);
        }
    });
    if interactive {
        console::spawn_console(events.clone());
    }

    let mut effects = dashboard.boot();
    loop {
        let mut quit = false;
        for effect in effects.drain(..) {
            match effect {
                Effect::RequestPlan {
                    request,
                    origin,
                    destination,
                } => {
                    let planner = Arc::clone(&planner);
                    let events = events.clone();
                    tokio::spawn(async move {
                        let result = planner.plan(&origin, &destination).await;
                        let _ = events.send(DashboardEvent::PlanReady { request, result });
                    });
                }
                Effect::FetchMapData => {
                    let gateway = Arc::clone(&gateway);
                    let events = events.clone();
                    tokio::spawn(async move {
                        let result = gateway.fetch_map_data().await;
                        let _ = events.send(DashboardEvent::MapDataReady(result));
                    });
                }
                Effect::Print(text) => println!("{}", text),
                Effect::Quit => quit = true,
            }
        }
        if quit {
            break;
        }
        match queue.recv().await {
            Some(event) => effects = dashboard.handle(event),
            None => break,
        }
    }

    bus.disconnect();
    log::info!("dashboard stopped");
    Ok(())
}
