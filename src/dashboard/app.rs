// app.rs
//
// The dashboard actor. Every input arrives as a `DashboardEvent` and is
// handled to completion before the next one; slow work (planning, geodata)
// is requested through returned `Effect`s and reported back as events.

use std::collections::HashMap;
use std::time::Duration;

use crate::communication::bus::BusEvent;
use crate::communication::messages::MeshMessage;
use crate::config::DashboardConfig;
use crate::control_system::traffic_light_controller::{PhaseTimer, TrafficLightController};
use crate::engine::scheduler::{Scheduler, TimerHandle};
use crate::error::{BusError, GeodataError, PlanningError};
use crate::geodata::{GridStatus, MapData};
use crate::global_variables::{CLOCK_TICK_SECS, MAX_EXTENSION_SECS, OVERRIDE_CLEAR_GRACE_SECS};
use crate::monitoring::map_render::{render_snapshot, MapSnapshot, SignalMarker};
use crate::monitoring::mission_log::{LogSeverity, LogSource, MissionLog};
use crate::orchestration::mission_plan::{MissionResponse, PlannedSignal};
use crate::shared_data::LatLon;
use crate::simulation_engine::intersections::IntersectionId;
use crate::simulation_engine::mission_clock::{format_mission_time, MissionClock, TickOutcome};

// Entries replayed when the log panel is switched back on.
const LOG_PANEL_BACKLOG: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionState {
    Idle,
    Orchestrating,
    Running,
    Completed,
}

impl MissionState {
    pub fn label(self) -> &'static str {
        match self {
            MissionState::Idle => "IDLE",
            MissionState::Orchestrating => "ORCHESTRATING",
            MissionState::Running => "RUNNING",
            MissionState::Completed => "COMPLETED",
        }
    }

    /// A new mission may only be started from these states.
    pub fn accepts_start(self) -> bool {
        matches!(self, MissionState::Idle | MissionState::Completed)
    }
}

/// Operator commands from the console.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    SetOrigin(String),
    SetDestination(String),
    StartMission,
    ToggleLog,
    ShowStatus,
    RetryMapSync,
    Snapshot,
    ExportLog,
    Quit,
}

#[derive(Debug)]
pub enum DashboardEvent {
    User(UserAction),
    Bus(BusEvent),
    Phase(PhaseTimer),
    OverrideExpired { id: IntersectionId, activation: u64 },
    ClockTick { generation: u64 },
    PlanReady {
        request: u64,
        result: Result<MissionResponse, PlanningError>,
    },
    MapDataReady(Result<MapData, GeodataError>),
    Shutdown,
}

impl From<PhaseTimer> for DashboardEvent {
    fn from(timer: PhaseTimer) -> Self {
        DashboardEvent::Phase(timer)
    }
}

impl From<BusEvent> for DashboardEvent {
    fn from(event: BusEvent) -> Self {
        DashboardEvent::Bus(event)
    }
}

impl From<UserAction> for DashboardEvent {
    fn from(action: UserAction) -> Self {
        DashboardEvent::User(action)
    }
}

/// Work the event loop must carry out on the dashboard's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    RequestPlan {
        request: u64,
        origin: String,
        destination: String,
    },
    FetchMapData,
    Print(String),
    Quit,
}

pub struct Dashboard<S>
where
    S: Scheduler<PhaseTimer> + Scheduler<DashboardEvent>,
{
    config: DashboardConfig,
    engine: TrafficLightController<S>,
    scheduler: S,
    clock: MissionClock,
    state: MissionState,
    log: MissionLog,
    origin: String,
    destination: String,
    planned: Vec<PlannedSignal>,
    plan_request: u64,
    tick: Option<<S as Scheduler<DashboardEvent>>::Handle>,
    override_clears: HashMap<IntersectionId, (u64, <S as Scheduler<DashboardEvent>>::Handle)>,
    live_position: Option<LatLon>,
    bus_linked: bool,
    grid: GridStatus,
    map: MapData,
    log_visible: bool,
    log_cursor: usize,
}

impl<S> Dashboard<S>
where
    S: Scheduler<PhaseTimer> + Scheduler<DashboardEvent> + Clone,
{
    pub fn new(config: DashboardConfig, scheduler: S) -> Self {
        Self {
            origin: config.origin.clone(),
            destination: config.destination.clone(),
            config,
            engine: TrafficLightController::new(scheduler.clone()),
            scheduler,
            clock: MissionClock::new(),
            state: MissionState::Idle,
            log: MissionLog::new(),
            planned: Vec::new(),
            plan_request: 0,
            tick: None,
            override_clears: HashMap::new(),
            live_position: None,
            bus_linked: false,
            grid: GridStatus::Connecting,
            map: MapData::default(),
            log_visible: true,
            log_cursor: 0,
        }
    }
}

impl<S> Dashboard<S>
where
    S: Scheduler<PhaseTimer> + Scheduler<DashboardEvent>,
{
    /// Initial effects: announce the dashboard and load the grid.
    pub fn boot(&mut self) -> Vec<Effect> {
        self.log.record(
            LogSource::Orchestrator,
            "SAM Grid Control online. Syncing city grid...",
            LogSeverity::Info,
        );
        self.grid = GridStatus::Connecting;
        let mut effects = vec![Effect::FetchMapData];
        self.drain_log_feed(&mut effects);
        effects
    }

    pub fn handle(&mut self, event: DashboardEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            DashboardEvent::User(action) => self.on_user(action, &mut effects),
            DashboardEvent::Bus(event) => self.on_bus(event),
            DashboardEvent::Phase(timer) => {
                self.engine.on_timer(&timer);
            }
            DashboardEvent::OverrideExpired { id, activation } => {
                self.on_override_expired(id, activation)
            }
            DashboardEvent::ClockTick { generation } => self.on_tick(generation),
            DashboardEvent::PlanReady { request, result } => self.on_plan(request, result),
            DashboardEvent::MapDataReady(result) => self.on_map_data(result),
            DashboardEvent::Shutdown => {
                self.teardown();
                effects.push(Effect::Quit);
            }
        }
        self.drain_log_feed(&mut effects);
        effects
    }

    fn on_user(&mut self, action: UserAction, effects: &mut Vec<Effect>) {
        match action {
            UserAction::SetOrigin(origin) => {
                let origin = origin.trim();
                if !origin.is_empty() {
                    self.origin = origin.to_string();
                    effects.push(Effect::Print(format!("Origin set to {}", self.origin)));
                }
            }
            UserAction::SetDestination(destination) => {
                let destination = destination.trim();
                if !destination.is_empty() {
                    self.destination = destination.to_string();
                    effects.push(Effect::Print(format!("Destination set to {}", self.destination)));
                }
            }
            UserAction::StartMission => {
                if let Some(effect) = self.start_mission() {
                    effects.push(effect);
                } else {
                    effects.push(Effect::Print(format!(
                        "Mission is {}; start ignored.",
                        self.state.label()
                    )));
                }
            }
            UserAction::ToggleLog => {
                self.log_visible = !self.log_visible;
                effects.push(Effect::Print(format!(
                    "Log panel {}",
                    if self.log_visible { "shown" } else { "hidden" }
                )));
                if self.log_visible {
                    effects.extend(
                        self.log
                            .tail(LOG_PANEL_BACKLOG)
                            .iter()
                            .map(|entry| Effect::Print(entry.to_string())),
                    );
                    self.log_cursor = self.log.len();
                }
            }
            UserAction::ShowStatus => effects.push(Effect::Print(self.status_report())),
            UserAction::RetryMapSync => {
                if self.grid == GridStatus::Connecting {
                    effects.push(Effect::Print("Grid sync already in progress.".to_string()));
                } else {
                    self.grid = GridStatus::Connecting;
                    self.log.record(
                        LogSource::TrafficSignal,
                        "Retrying city grid sync...",
                        LogSeverity::Info,
                    );
                    effects.push(Effect::FetchMapData);
                }
            }
            UserAction::Snapshot => effects.push(self.render_map()),
            UserAction::ExportLog => {
                let path = &self.config.log_csv_path;
                let message = match self.log.export_csv(path) {
                    Ok(n) => format!("Exported {} log entries to {}", n, path.display()),
                    Err(e) => {
                        log::error!("log export to {} failed: {}", path.display(), e);
                        format!("Log export failed: {}", e)
                    }
                };
                effects.push(Effect::Print(message));
            }
            UserAction::Quit => {
                self.teardown();
                effects.push(Effect::Quit);
            }
        }
    }

    /// Moves Idle/Completed to Orchestrating and asks for a plan. Returns
    /// `None` while a mission is being orchestrated or running.
    pub fn start_mission(&mut self) -> Option<Effect> {
        if !self.state.accepts_start() {
            log::warn!("start rejected: mission is {}", self.state.label());
            return None;
        }
        self.cancel_tick();
        self.clock.stop();
        self.state = MissionState::Orchestrating;
        self.plan_request += 1;
        self.log.record(
            LogSource::Orchestrator,
            format!("Initiating dispatch: {} -> {}", self.origin, self.destination),
            LogSeverity::Info,
        );
        Some(Effect::RequestPlan {
            request: self.plan_request,
            origin: self.origin.clone(),
            destination: self.destination.clone(),
        })
    }

    fn on_plan(&mut self, request: u64, result: Result<MissionResponse, PlanningError>) {
        if request != self.plan_request || self.state != MissionState::Orchestrating {
            log::debug!("discarding plan for superseded request {}", request);
            return;
        }
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.log.record(
                    LogSource::Orchestrator,
                    format!("Route planning failed: {}", e),
                    LogSeverity::Error,
                );
                self.log.record(
                    LogSource::Orchestrator,
                    "Mission sequence aborted - Simulation sync failed.",
                    LogSeverity::Error,
                );
                self.state = MissionState::Idle;
                return;
            }
        };

        let MissionResponse { plan, signals } = response;
        self.log.record(
            LogSource::Orchestrator,
            format!(
                "Route locked: {:.2} km, ETA {} across {} segments",
                plan.distance_km(),
                format_mission_time(plan.total_duration_seconds),
                plan.segments.len()
            ),
            LogSeverity::Success,
        );
        self.log.record(
            LogSource::TrafficBrain,
            format!("{} intersections flagged for preemption along route", signals.len()),
            LogSeverity::Info,
        );
        self.planned = signals;

        let generation = self.clock.start(plan);
        self.state = MissionState::Running;
        self.log.record(
            LogSource::Ambulance,
            "Unit dispatched. Following optimal route.",
            LogSeverity::Success,
        );
        self.arm_tick(generation);
    }

    fn on_tick(&mut self, generation: u64) {
        if generation != self.clock.generation() || self.state != MissionState::Running {
            log::trace!("stale clock tick {} ignored", generation);
            return;
        }
        self.tick = None;
        match self.clock.tick() {
            TickOutcome::Advanced { .. } => self.arm_tick(generation),
            TickOutcome::Completed { .. } => {
                self.state = MissionState::Completed;
                self.log.record(
                    LogSource::Ambulance,
                    "MISSION ACCOMPLISHED: Units arriving at target.",
                    LogSeverity::Success,
                );
            }
            TickOutcome::Inactive => {}
        }
    }

    fn on_bus(&mut self, event: BusEvent) {
        match event {
            BusEvent::Connected => {
                self.bus_linked = true;
                self.log.record(LogSource::Mesh, "Solace Agent Mesh Connected", LogSeverity::Mesh);
            }
            BusEvent::Disconnected => {
                self.bus_linked = false;
                self.log.record(
                    LogSource::Mesh,
                    "Solace Agent Mesh Disconnected",
                    LogSeverity::Warning,
                );
            }
            BusEvent::Message { topic, payload } => match MeshMessage::decode(&topic, &payload) {
                Ok(MeshMessage::Location(fix)) => {
                    log::debug!("live fix from {}: {}", fix.source, fix.position());
                    self.live_position = Some(fix.position());
                }
                Ok(MeshMessage::SignalCommand(command)) => {
                    let extension = command.extension_seconds();
                    self.preempt(command.intersection_id, extension);
                }
                Ok(MeshMessage::Other { topic }) => {
                    log::debug!("ignoring message on {}", topic);
                }
                Err(e) => log::warn!("discarding mesh message: {}", e),
            },
        }
    }

    /// Forces `id` green for `10 + extension` seconds and schedules the
    /// override clear for the same moment.
    pub fn preempt(&mut self, id: IntersectionId, extension: u64) {
        let extension = extension.min(MAX_EXTENSION_SECS);
        let activation = self.engine.apply_override(&id, extension);
        self.log.record(
            LogSource::TrafficBrain,
            format!("EMERGENCY PREEMPTION: Intersection {} forced GREEN (+{}s)", id, extension),
            LogSeverity::Warning,
        );
        let handle = <S as Scheduler<DashboardEvent>>::schedule(
            &mut self.scheduler,
            Duration::from_secs(OVERRIDE_CLEAR_GRACE_SECS.saturating_add(extension)),
            DashboardEvent::OverrideExpired {
                id: id.clone(),
                activation,
            },
        );
        if let Some((_, previous)) = self.override_clears.insert(id, (activation, handle)) {
            previous.cancel();
        }
    }

    fn on_override_expired(&mut self, id: IntersectionId, activation: u64) {
        if self
            .override_clears
            .get(&id)
            .is_some_and(|(current, _)| *current == activation)
        {
            self.override_clears.remove(&id);
        }
        if self.engine.clear_override(&id, Some(activation)) {
            self.log.record(
                LogSource::TrafficSignal,
                format!("Intersection {} override expired. Resuming normal cycle.", id),
                LogSeverity::Info,
            );
        }
    }

    fn on_map_data(&mut self, result: Result<MapData, GeodataError>) {
        match result {
            Ok(data) => {
                for (index, site) in data.signals.iter().enumerate() {
                    self.engine.register(site.id.clone(), site.position, index);
                }
                self.grid = GridStatus::Active {
                    signals: data.signals.len(),
                    roads: data.roads.len(),
                };
                self.log.record(
                    LogSource::TrafficSignal,
                    format!(
                        "City grid online: {} signals under control, {} roads mapped",
                        data.signals.len(),
                        data.roads.len()
                    ),
                    LogSeverity::Success,
                );
                self.map = data;
            }
            Err(e) => {
                self.grid = GridStatus::Offline(e.to_string());
                self.log.record(
                    LogSource::TrafficSignal,
                    format!("City grid sync failed: {}", e),
                    LogSeverity::Error,
                );
            }
        }
    }

    /// Records a bus failure that happened outside the event stream.
    pub fn record_bus_failure(&mut self, error: &BusError) {
        self.log.record(
            LogSource::Mesh,
            format!("Agent mesh unavailable: {}", error),
            LogSeverity::Error,
        );
    }

    /// Cancels every pending timer: the mission tick, override clears and
    /// all phase transitions.
    pub fn teardown(&mut self) {
        self.cancel_tick();
        self.clock.stop();
        for (_, (_, handle)) in self.override_clears.drain() {
            handle.cancel();
        }
        self.engine.on_teardown();
    }

    fn arm_tick(&mut self, generation: u64) {
        let handle = <S as Scheduler<DashboardEvent>>::schedule(
            &mut self.scheduler,
            Duration::from_secs(CLOCK_TICK_SECS),
            DashboardEvent::ClockTick { generation },
        );
        if let Some(previous) = self.tick.replace(handle) {
            previous.cancel();
        }
    }

    fn cancel_tick(&mut self) {
        if let Some(handle) = self.tick.take() {
            handle.cancel();
        }
    }

    fn drain_log_feed(&mut self, effects: &mut Vec<Effect>) {
        if self.log_visible {
            effects.extend(
                self.log.entries()[self.log_cursor.min(self.log.len())..]
                    .iter()
                    .map(|entry| Effect::Print(entry.to_string())),
            );
        }
        self.log_cursor = self.log.len();
    }

    fn render_map(&self) -> Effect {
        let route = self.clock.plan().map(|p| p.polyline.as_slice()).unwrap_or(&[]);
        let signals = self
            .engine
            .signals()
            .into_iter()
            .map(|s| SignalMarker {
                position: s.position,
                phase: s.phase,
                overridden: self.engine.is_overridden(&s.id),
            })
            .collect();
        let snapshot = MapSnapshot {
            bbox: self.config.geodata.bbox,
            roads: &self.map.roads,
            route,
            planned: &self.planned,
            signals,
            ambulance: self.clock.current_position(),
            live_position: self.live_position,
        };
        let path = &self.config.snapshot_path;
        match render_snapshot(path, &snapshot) {
            Ok(()) => Effect::Print(format!("Map snapshot saved to {}", path.display())),
            Err(e) => {
                log::error!("snapshot to {} failed: {}", path.display(), e);
                Effect::Print(format!("Map snapshot failed: {}", e))
            }
        }
    }

    pub fn status_report(&self) -> String {
        let position = |p: Option<LatLon>| p.map(|p| p.to_string()).unwrap_or_else(|| "n/a".to_string());
        let distance = self
            .clock
            .plan()
            .map(|p| format!("{:.2} km", p.distance_km()))
            .unwrap_or_else(|| "n/a".to_string());
        let (green, yellow, red) = self.engine.phase_counts();
        let mut overrides: Vec<String> = self
            .engine
            .overrides()
            .iter()
            .filter(|(_, o)| o.active)
            .map(|(id, o)| format!("{} (+{}s)", id, o.extension_seconds))
            .collect();
        overrides.sort();

        let mut report = String::new();
        report.push_str("\n=== SAM Grid Control Status ===\n");
        report.push_str(&format!("Mission:        {}\n", self.state.label()));
        report.push_str(&format!("Route:          {} -> {}\n", self.origin, self.destination));
        report.push_str(&format!(
            "Time left:      {}\n",
            format_mission_time(self.clock.remaining_seconds())
        ));
        report.push_str(&format!("Distance:       {}\n", distance));
        report.push_str(&format!("Ambulance:      {}\n", position(self.clock.current_position())));
        report.push_str(&format!("Live fix:       {}\n", position(self.live_position)));
        report.push_str(&format!(
            "Mesh link:      {}\n",
            if self.bus_linked { "LINKED" } else { "OFFLINE" }
        ));
        report.push_str(&format!("Grid:           {}\n", self.grid.label()));
        report.push_str(&format!(
            "Signals:        {} green / {} yellow / {} red\n",
            green, yellow, red
        ));
        if overrides.is_empty() {
            report.push_str("Overrides:      none\n");
        } else {
            report.push_str(&format!("Overrides:      {}\n", overrides.join(", ")));
        }
        report
    }

    pub fn state(&self) -> MissionState {
        self.state
    }

    pub fn clock(&self) -> &MissionClock {
        &self.clock
    }

    pub fn engine(&self) -> &TrafficLightController<S> {
        &self.engine
    }

    pub fn log(&self) -> &MissionLog {
        &self.log
    }

    pub fn grid(&self) -> &GridStatus {
        &self.grid
    }

    pub fn live_position(&self) -> Option<LatLon> {
        self.live_position
    }

    pub fn is_bus_linked(&self) -> bool {
        self.bus_linked
    }

    pub fn planned_signals(&self) -> &[PlannedSignal] {
        &self.planned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scheduler::ManualScheduler;
    use crate::geodata::SignalSite;
    use crate::orchestration::mission_plan::MissionPlan;
    use crate::simulation_engine::intersections::LightState;
    use crate::simulation_engine::mission_clock::ClockState;

    type TestDashboard = Dashboard<ManualScheduler<DashboardEvent>>;

    fn setup() -> (TestDashboard, ManualScheduler<DashboardEvent>) {
        let scheduler = ManualScheduler::new();
        let mut dashboard = Dashboard::new(DashboardConfig::default(), scheduler.clone());
        dashboard.boot();
        (dashboard, scheduler)
    }

    fn run_until(dashboard: &mut TestDashboard, scheduler: &ManualScheduler<DashboardEvent>, secs: u64) {
        while let Some((_, event)) = scheduler.pop_until(Duration::from_secs(secs)) {
            dashboard.handle(event);
        }
    }

    fn mission(total: f64, points: usize) -> MissionResponse {
        MissionResponse {
            plan: MissionPlan {
                total_distance_meters: 5200.0,
                total_duration_seconds: total,
                segments: Vec::new(),
                polyline: (0..points)
                    .map(|i| LatLon::new(45.40 + i as f64 * 0.001, -75.72))
                    .collect(),
                start_timestamp: 0,
            },
            signals: Vec::new(),
        }
    }

    fn grid(ids: &[&str]) -> MapData {
        MapData {
            signals: ids
                .iter()
                .enumerate()
                .map(|(i, id)| SignalSite {
                    id: IntersectionId::from(*id),
                    position: LatLon::new(45.41, -75.70 + i as f64 * 0.001),
                    tags: HashMap::new(),
                })
                .collect(),
            roads: Vec::new(),
        }
    }

    fn request_of(effects: &[Effect]) -> Option<u64> {
        effects.iter().find_map(|e| match e {
            Effect::RequestPlan { request, .. } => Some(*request),
            _ => None,
        })
    }

    fn count_messages(dashboard: &TestDashboard, text: &str) -> usize {
        dashboard
            .log()
            .entries()
            .iter()
            .filter(|e| e.message.contains(text))
            .count()
    }

    #[test]
    fn boot_requests_map_data() {
        let scheduler = ManualScheduler::new();
        let mut dashboard: TestDashboard = Dashboard::new(DashboardConfig::default(), scheduler);
        let effects = dashboard.boot();
        assert!(effects.contains(&Effect::FetchMapData));
        assert_eq!(*dashboard.grid(), GridStatus::Connecting);
    }

    #[test]
    fn start_is_rejected_while_orchestrating_or_running() {
        let (mut dashboard, _scheduler) = setup();

        let effects = dashboard.handle(UserAction::StartMission.into());
        let request = request_of(&effects).expect("plan requested");
        assert_eq!(dashboard.state(), MissionState::Orchestrating);

        let effects = dashboard.handle(UserAction::StartMission.into());
        assert_eq!(request_of(&effects), None);
        assert_eq!(dashboard.state(), MissionState::Orchestrating);

        dashboard.handle(DashboardEvent::PlanReady {
            request,
            result: Ok(mission(600.0, 11)),
        });
        assert_eq!(dashboard.state(), MissionState::Running);

        let effects = dashboard.handle(UserAction::StartMission.into());
        assert_eq!(request_of(&effects), None);
        assert_eq!(dashboard.state(), MissionState::Running);
    }

    #[test]
    fn planning_failure_aborts_to_idle() {
        let (mut dashboard, scheduler) = setup();
        let request = request_of(&dashboard.handle(UserAction::StartMission.into())).unwrap();

        dashboard.handle(DashboardEvent::PlanReady {
            request,
            result: Err(PlanningError::Schema("missing simulation.route".to_string())),
        });

        assert_eq!(dashboard.state(), MissionState::Idle);
        assert_eq!(
            count_messages(&dashboard, "Mission sequence aborted - Simulation sync failed."),
            1
        );
        assert_eq!(scheduler.pending(), 0);
        assert!(request_of(&dashboard.handle(UserAction::StartMission.into())).is_some());
    }

    #[test]
    fn superseded_plan_is_ignored() {
        let (mut dashboard, _scheduler) = setup();
        let request = request_of(&dashboard.handle(UserAction::StartMission.into())).unwrap();
        dashboard.handle(DashboardEvent::PlanReady {
            request: request + 7,
            result: Ok(mission(60.0, 3)),
        });
        assert_eq!(dashboard.state(), MissionState::Orchestrating);
    }

    #[test]
    fn mission_runs_to_completion_exactly_once() {
        let (mut dashboard, scheduler) = setup();
        let request = request_of(&dashboard.handle(UserAction::StartMission.into())).unwrap();
        dashboard.handle(DashboardEvent::PlanReady {
            request,
            result: Ok(mission(5.0, 6)),
        });

        run_until(&mut dashboard, &scheduler, 3);
        assert_eq!(dashboard.clock().clock(), 3);
        let polyline = dashboard.clock().plan().unwrap().polyline.clone();
        assert_eq!(dashboard.clock().current_position(), Some(polyline[3]));

        run_until(&mut dashboard, &scheduler, 20);
        assert_eq!(dashboard.state(), MissionState::Completed);
        assert_eq!(dashboard.clock().state(), ClockState::Completed);
        assert_eq!(dashboard.clock().clock(), 5);
        assert_eq!(dashboard.clock().current_position(), Some(polyline[5]));
        assert_eq!(count_messages(&dashboard, "MISSION ACCOMPLISHED"), 1);
        assert_eq!(scheduler.pending(), 0);

        // A finished mission may be followed by a new one.
        assert!(request_of(&dashboard.handle(UserAction::StartMission.into())).is_some());
    }

    #[test]
    fn tick_from_replaced_mission_is_ignored() {
        let (mut dashboard, _scheduler) = setup();
        let request = request_of(&dashboard.handle(UserAction::StartMission.into())).unwrap();
        dashboard.handle(DashboardEvent::PlanReady {
            request,
            result: Ok(mission(60.0, 3)),
        });
        let stale = dashboard.clock().generation() + 1;
        dashboard.handle(DashboardEvent::ClockTick { generation: stale });
        assert_eq!(dashboard.clock().clock(), 0);
    }

    #[test]
    fn map_data_registers_staggered_signals() {
        let (mut dashboard, _scheduler) = setup();
        dashboard.handle(DashboardEvent::MapDataReady(Ok(grid(&["1", "2", "3"]))));

        assert_eq!(*dashboard.grid(), GridStatus::Active { signals: 3, roads: 0 });
        let engine = dashboard.engine();
        assert_eq!(engine.phase_of(&"1".into()), Some(LightState::Green));
        assert_eq!(engine.phase_of(&"2".into()), Some(LightState::Yellow));
        assert_eq!(engine.phase_of(&"3".into()), Some(LightState::Red));
    }

    #[test]
    fn map_failure_goes_offline_and_can_retry() {
        let (mut dashboard, _scheduler) = setup();
        dashboard.handle(DashboardEvent::MapDataReady(Err(GeodataError::RetriesExhausted {
            attempts: 3,
            last: Box::new(GeodataError::RateLimited),
        })));
        assert!(matches!(dashboard.grid(), GridStatus::Offline(msg) if msg.contains("3 attempts")));

        let effects = dashboard.handle(UserAction::RetryMapSync.into());
        assert!(effects.contains(&Effect::FetchMapData));
        assert_eq!(*dashboard.grid(), GridStatus::Connecting);
    }

    #[test]
    fn signal_command_preempts_and_clears_after_window() {
        let (mut dashboard, scheduler) = setup();
        dashboard.handle(DashboardEvent::MapDataReady(Ok(grid(&["1", "2"]))));
        dashboard.handle(BusEvent::Connected.into());

        let payload = br#"{"intersectionId": 2, "command": "EXTEND_GREEN", "durationSeconds": 20}"#;
        dashboard.handle(
            BusEvent::Message {
                topic: "sam.signals.command.2".to_string(),
                payload: payload.to_vec(),
            }
            .into(),
        );

        let id: IntersectionId = "2".into();
        assert_eq!(dashboard.engine().phase_of(&id), Some(LightState::Green));
        assert!(dashboard.engine().is_overridden(&id));
        assert_eq!(count_messages(&dashboard, "EMERGENCY PREEMPTION"), 1);

        run_until(&mut dashboard, &scheduler, 29);
        assert_eq!(dashboard.engine().phase_of(&id), Some(LightState::Green));

        // Cleared at 10 + 20 s; the interrupted yellow resumes with its 2 s.
        run_until(&mut dashboard, &scheduler, 30);
        assert!(!dashboard.engine().is_overridden(&id));
        assert_eq!(dashboard.engine().phase_of(&id), Some(LightState::Yellow));
        assert_eq!(
            dashboard.engine().next_transition_in(&id),
            Some(Duration::from_secs(2))
        );
        assert_eq!(count_messages(&dashboard, "override expired"), 1);
    }

    #[test]
    fn repeated_command_keeps_latest_override() {
        let (mut dashboard, scheduler) = setup();
        dashboard.handle(DashboardEvent::MapDataReady(Ok(grid(&["7"]))));
        let id: IntersectionId = "7".into();

        dashboard.preempt(id.clone(), 5);
        run_until(&mut dashboard, &scheduler, 10);
        dashboard.preempt(id.clone(), 15);

        // The first activation's clear (due at 15 s) must not end the second.
        run_until(&mut dashboard, &scheduler, 20);
        assert!(dashboard.engine().is_overridden(&id));
        run_until(&mut dashboard, &scheduler, 35);
        assert!(!dashboard.engine().is_overridden(&id));
    }

    #[test]
    fn missing_duration_uses_default_extension() {
        let (mut dashboard, _scheduler) = setup();
        let payload = br#"{"intersectionId": "99"}"#;
        dashboard.handle(
            BusEvent::Message {
                topic: "sam.signals.command.99".to_string(),
                payload: payload.to_vec(),
            }
            .into(),
        );
        let entry = dashboard.engine().override_for(&"99".into()).unwrap();
        assert!(entry.active);
        assert_eq!(entry.extension_seconds, 15);
    }

    #[test]
    fn oversized_command_duration_is_capped() {
        let (mut dashboard, scheduler) = setup();
        dashboard.handle(DashboardEvent::MapDataReady(Ok(grid(&["1", "2", "3"]))));
        dashboard.handle(
            BusEvent::Message {
                topic: "sam.signals.command.2".to_string(),
                payload: br#"{"intersectionId": 2, "durationSeconds": 1e30}"#.to_vec(),
            }
            .into(),
        );
        let id = IntersectionId::from("2");
        assert_eq!(dashboard.engine().phase_of(&id), Some(LightState::Green));
        assert_eq!(
            dashboard.engine().override_for(&id).unwrap().extension_seconds,
            MAX_EXTENSION_SECS
        );

        run_until(&mut dashboard, &scheduler, OVERRIDE_CLEAR_GRACE_SECS + MAX_EXTENSION_SECS);
        assert!(!dashboard.engine().is_overridden(&id));
    }

    #[test]
    fn log_panel_replays_only_the_recent_backlog() {
        let (mut dashboard, _scheduler) = setup();
        dashboard.handle(UserAction::ToggleLog.into());
        for _ in 0..LOG_PANEL_BACKLOG + 5 {
            dashboard.handle(BusEvent::Connected.into());
            dashboard.handle(BusEvent::Disconnected.into());
        }

        let effects = dashboard.handle(UserAction::ToggleLog.into());
        assert_eq!(effects.first(), Some(&Effect::Print("Log panel shown".to_string())));
        assert_eq!(effects.len(), LOG_PANEL_BACKLOG + 1);
        assert_eq!(dashboard.handle(UserAction::ShowStatus.into()).len(), 1);
    }

    #[test]
    fn location_updates_live_position_and_bad_payloads_are_dropped() {
        let (mut dashboard, _scheduler) = setup();
        dashboard.handle(BusEvent::Connected.into());
        let before = dashboard.log().len();

        dashboard.handle(
            BusEvent::Message {
                topic: "sam.ambulance.location".to_string(),
                payload: br#"{"lat": 45.42, "lon": -75.69}"#.to_vec(),
            }
            .into(),
        );
        assert_eq!(dashboard.live_position(), Some(LatLon::new(45.42, -75.69)));

        dashboard.handle(
            BusEvent::Message {
                topic: "sam.ambulance.location".to_string(),
                payload: b"{oops".to_vec(),
            }
            .into(),
        );
        assert_eq!(dashboard.live_position(), Some(LatLon::new(45.42, -75.69)));
        assert!(dashboard.is_bus_linked());
        assert_eq!(dashboard.log().len(), before);
    }

    #[test]
    fn bus_lifecycle_updates_link_status() {
        let (mut dashboard, _scheduler) = setup();
        dashboard.handle(BusEvent::Connected.into());
        assert!(dashboard.status_report().contains("LINKED"));
        dashboard.handle(BusEvent::Disconnected.into());
        assert!(!dashboard.is_bus_linked());
        assert!(dashboard.status_report().contains("OFFLINE"));
    }

    #[test]
    fn quit_cancels_every_timer() {
        let (mut dashboard, scheduler) = setup();
        dashboard.handle(DashboardEvent::MapDataReady(Ok(grid(&["1", "2", "3"]))));
        let request = request_of(&dashboard.handle(UserAction::StartMission.into())).unwrap();
        dashboard.handle(DashboardEvent::PlanReady {
            request,
            result: Ok(mission(600.0, 11)),
        });
        dashboard.preempt("2".into(), 15);
        assert!(scheduler.pending() > 0);

        let effects = dashboard.handle(UserAction::Quit.into());
        assert!(effects.contains(&Effect::Quit));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn log_panel_feed_follows_toggle() {
        let (mut dashboard, _scheduler) = setup();
        let effects = dashboard.handle(BusEvent::Connected.into());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Print(line) if line.contains("Solace Agent Mesh Connected"))));

        dashboard.handle(UserAction::ToggleLog.into());
        let effects = dashboard.handle(BusEvent::Disconnected.into());
        assert!(effects.is_empty());

        let effects = dashboard.handle(UserAction::ToggleLog.into());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Print(line) if line.contains("Disconnected"))));
    }

    #[test]
    fn export_log_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let config = DashboardConfig {
            log_csv_path: dir.path().join("log.csv"),
            ..DashboardConfig::default()
        };
        let mut dashboard: TestDashboard = Dashboard::new(config, ManualScheduler::new());
        dashboard.boot();
        let effects = dashboard.handle(UserAction::ExportLog.into());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Print(line) if line.starts_with("Exported 1 log entries"))));
        assert!(dir.path().join("log.csv").exists());
    }
}
