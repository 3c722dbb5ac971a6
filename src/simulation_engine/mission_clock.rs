use crate::orchestration::mission_plan::MissionPlan;
use crate::shared_data::LatLon;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Idle,
    Running,
    Stopped,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Clock moved forward by one second.
    Advanced { clock: i64, remaining: f64 },
    /// This tick finished the mission. Reported once per mission.
    Completed { clock: i64 },
    /// No running mission; nothing happened.
    Inactive,
}

/// Duration used for progress math: a zero, negative or missing total is
/// treated as one second.
pub fn effective_duration(plan: &MissionPlan) -> f64 {
    if plan.total_duration_seconds > 0.0 {
        plan.total_duration_seconds
    } else {
        1.0
    }
}

/// Fraction of the route covered at `clock`, clamped to [0, 1].
pub fn progress_at(plan: &MissionPlan, clock: i64) -> f64 {
    let elapsed = clock.saturating_sub(plan.start_timestamp) as f64;
    (elapsed / effective_duration(plan)).clamp(0.0, 1.0)
}

/// Ambulance position at `clock`: the polyline point at
/// `floor(progress * (len - 1))`. Interpolation is linear in point index,
/// not in distance. `None` for an empty polyline.
pub fn position_at(plan: &MissionPlan, clock: i64) -> Option<LatLon> {
    let last = plan.polyline.len().checked_sub(1)?;
    let index = (progress_at(plan, clock) * last as f64).floor() as usize;
    plan.polyline.get(index.min(last)).copied()
}

/// Seconds left on the mission at `clock`, never negative.
pub fn remaining_at(plan: &MissionPlan, clock: i64) -> f64 {
    (effective_duration(plan) - clock.saturating_sub(plan.start_timestamp) as f64).max(0.0)
}

/// `m:ss` readout of a second count.
pub fn format_mission_time(total_seconds: f64) -> String {
    let total = total_seconds.abs().floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Logical mission clock. Advances one second per tick while a mission is
/// running and derives the ambulance position from elapsed time alone.
#[derive(Debug, Clone)]
pub struct MissionClock {
    plan: Option<MissionPlan>,
    clock: i64,
    state: ClockState,
    generation: u64,
}

impl Default for MissionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MissionClock {
    pub fn new() -> Self {
        Self {
            plan: None,
            clock: 0,
            state: ClockState::Idle,
            generation: 0,
        }
    }

    /// Replaces any previous mission and starts the clock at the plan's
    /// start timestamp. Returns the new mission generation.
    pub fn start(&mut self, plan: MissionPlan) -> u64 {
        self.clock = plan.start_timestamp;
        self.plan = Some(plan);
        self.state = ClockState::Running;
        self.generation += 1;
        self.generation
    }

    pub fn tick(&mut self) -> TickOutcome {
        let Some(plan) = self.plan.as_ref() else {
            return TickOutcome::Inactive;
        };
        if self.state != ClockState::Running {
            return TickOutcome::Inactive;
        }

        self.clock = self.clock.saturating_add(1);
        let remaining = remaining_at(plan, self.clock);
        if remaining <= 0.0 {
            self.state = ClockState::Completed;
            log::info!("mission clock completed at {}", self.clock);
            TickOutcome::Completed { clock: self.clock }
        } else {
            TickOutcome::Advanced {
                clock: self.clock,
                remaining,
            }
        }
    }

    /// Halts advancement; the plan and clock value are kept for display.
    pub fn stop(&mut self) {
        if self.state == ClockState::Running {
            self.state = ClockState::Stopped;
        }
    }

    pub fn position_at(&self, clock: i64) -> Option<LatLon> {
        self.plan.as_ref().and_then(|p| position_at(p, clock))
    }

    pub fn current_position(&self) -> Option<LatLon> {
        self.position_at(self.clock)
    }

    pub fn progress(&self) -> f64 {
        self.plan
            .as_ref()
            .map(|p| progress_at(p, self.clock))
            .unwrap_or(0.0)
    }

    pub fn remaining_seconds(&self) -> f64 {
        self.plan
            .as_ref()
            .map(|p| remaining_at(p, self.clock))
            .unwrap_or(0.0)
    }

    pub fn clock(&self) -> i64 {
        self.clock
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ClockState::Running
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn plan(&self) -> Option<&MissionPlan> {
        self.plan.as_ref()
    }
}
