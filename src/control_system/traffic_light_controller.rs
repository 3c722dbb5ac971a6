use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::engine::scheduler::{Scheduler, TimerHandle};
use crate::global_variables::{GREEN_SECS, MAX_EXTENSION_SECS};
use crate::shared_data::{current_timestamp_ms, LatLon};
use crate::simulation_engine::intersections::{
    IntersectionId, IntersectionSignal, LightState, SignalOverride, PHASE_SEQUENCE,
};

/// Fired when an intersection's current hold elapses. `generation` ties the
/// firing to the transition that scheduled it; anything else is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTimer {
    pub id: IntersectionId,
    pub generation: u64,
}

struct PendingTransition<H> {
    generation: u64,
    due: Instant,
    handle: H,
}

pub struct IntersectionController<H> {
    pub signal: IntersectionSignal,
    pending: Option<PendingTransition<H>>,
    // Hold left on the autonomous phase when an override interrupted it.
    paused_remaining: Option<Duration>,
}

impl<H: TimerHandle> IntersectionController<H> {
    fn new(signal: IntersectionSignal) -> Self {
        Self {
            signal,
            pending: None,
            paused_remaining: None,
        }
    }

    fn cancel_pending(&mut self) -> Option<Instant> {
        self.pending.take().map(|p| {
            p.handle.cancel();
            p.due
        })
    }
}

/// Owns one autonomous green/yellow/red cycle per known intersection and the
/// live override table, and reconciles the two.
pub struct TrafficLightController<S: Scheduler<PhaseTimer>> {
    controllers: HashMap<IntersectionId, IntersectionController<S::Handle>>,
    overrides: HashMap<IntersectionId, SignalOverride>,
    scheduler: S,
    next_generation: u64,
    next_activation: u64,
}

impl<S: Scheduler<PhaseTimer>> TrafficLightController<S> {
    pub fn new(scheduler: S) -> Self {
        Self {
            controllers: HashMap::new(),
            overrides: HashMap::new(),
            scheduler,
            next_generation: 1,
            next_activation: 1,
        }
    }

    /// Registers a discovered signal and starts its cycle. The Nth discovered
    /// signal starts at sequence index `N mod 3`.
    pub fn register(&mut self, id: IntersectionId, position: LatLon, discovery_index: usize) {
        if let Some(existing) = self.controllers.get_mut(&id) {
            existing.signal.position = position;
            return;
        }
        let signal = IntersectionSignal::new(id.clone(), position, discovery_index);
        self.controllers
            .insert(id.clone(), IntersectionController::new(signal));
        self.start_cycle(&id, discovery_index, false);
    }

    /// (Re)starts an intersection's timer chain, cancelling whatever
    /// transition was pending. With `force_green` the cycle restarts from
    /// green regardless of `offset`. Returns false for unknown intersections.
    pub fn start_cycle(&mut self, id: &IntersectionId, offset: usize, force_green: bool) -> bool {
        let Some(ctrl) = self.controllers.get_mut(id) else {
            log::debug!("start_cycle ignored for unknown intersection {}", id);
            return false;
        };
        ctrl.cancel_pending();
        ctrl.paused_remaining = None;
        ctrl.signal.forced = false;
        ctrl.signal.sequence_index = if force_green {
            0
        } else {
            offset % PHASE_SEQUENCE.len()
        };
        self.run_tick(id);
        true
    }

    /// Injects a live preemption: the intersection turns green at once and
    /// holds for the nominal green plus `extension_seconds`, capped at
    /// `MAX_EXTENSION_SECS`. The override is recorded even for intersections
    /// the engine does not know.
    /// Returns the activation token to pass to [`Self::clear_override`].
    pub fn apply_override(&mut self, id: &IntersectionId, extension_seconds: u64) -> u64 {
        let extension_seconds = extension_seconds.min(MAX_EXTENSION_SECS);
        let activation = self.next_activation;
        self.next_activation += 1;
        self.overrides.insert(
            id.clone(),
            SignalOverride {
                active: true,
                activated_at_epoch_ms: current_timestamp_ms(),
                extension_seconds,
                activation,
            },
        );

        let now = self.scheduler.now();
        if let Some(ctrl) = self.controllers.get_mut(id) {
            let due = ctrl.cancel_pending();
            // A second override during a forced hold keeps the first remainder.
            if !ctrl.signal.forced {
                ctrl.paused_remaining = due.map(|d| d.saturating_duration_since(now));
            }
            log::info!(
                "Intersection {} EMERGENCY OVERRIDE: green +{}s (was {})",
                id,
                extension_seconds,
                ctrl.signal.phase
            );
            self.run_tick(id);
        } else {
            log::debug!("override recorded for unregistered intersection {}", id);
        }
        activation
    }

    /// Deactivates an override and resumes the autonomous cycle from where it
    /// was interrupted. With `activation` set, only that activation is
    /// cleared; a newer override for the same intersection stays in force.
    pub fn clear_override(&mut self, id: &IntersectionId, activation: Option<u64>) -> bool {
        let Some(entry) = self.overrides.get_mut(id) else {
            return false;
        };
        if !entry.active || activation.is_some_and(|a| a != entry.activation) {
            return false;
        }
        entry.active = false;

        if let Some(ctrl) = self.controllers.get_mut(id) {
            if ctrl.signal.forced {
                ctrl.cancel_pending();
                log::info!("Clearing emergency override for intersection {}", id);
                self.run_tick(id);
            }
        }
        true
    }

    /// Handles a fired phase timer. Returns the newly displayed phase, or
    /// `None` when the firing was stale or for an unknown intersection.
    pub fn on_timer(&mut self, timer: &PhaseTimer) -> Option<LightState> {
        let ctrl = self.controllers.get_mut(&timer.id)?;
        match &ctrl.pending {
            Some(p) if p.generation == timer.generation => {}
            _ => {
                log::trace!("stale phase timer for {} ignored", timer.id);
                return None;
            }
        }
        ctrl.pending = None;
        if !ctrl.signal.forced {
            ctrl.signal.sequence_index = (ctrl.signal.sequence_index + 1) % PHASE_SEQUENCE.len();
        }
        self.run_tick(&timer.id);
        self.phase_of(&timer.id)
    }

    /// Cancels every pending transition.
    pub fn on_teardown(&mut self) {
        for ctrl in self.controllers.values_mut() {
            ctrl.cancel_pending();
        }
        log::debug!("signal engine torn down ({} intersections)", self.controllers.len());
    }

    // Shows the phase for the current state and schedules the next transition.
    fn run_tick(&mut self, id: &IntersectionId) {
        let active = self
            .overrides
            .get(id)
            .filter(|o| o.active)
            .map(|o| o.extension_seconds);
        let Some(ctrl) = self.controllers.get_mut(id) else {
            return;
        };

        let hold = match active {
            Some(extension) => {
                ctrl.signal.phase = LightState::Green;
                ctrl.signal.forced = true;
                Duration::from_secs(GREEN_SECS.saturating_add(extension))
            }
            None => {
                let phase = ctrl.signal.sequence_phase();
                let hold = if ctrl.signal.forced {
                    ctrl.signal.forced = false;
                    ctrl.paused_remaining
                        .take()
                        .unwrap_or_else(|| phase.nominal_hold())
                } else {
                    phase.nominal_hold()
                };
                ctrl.signal.phase = phase;
                hold
            }
        };

        let generation = self.next_generation;
        self.next_generation += 1;
        let due = self.scheduler.now() + hold;
        let handle = self.scheduler.schedule(
            hold,
            PhaseTimer {
                id: id.clone(),
                generation,
            },
        );
        ctrl.pending = Some(PendingTransition {
            generation,
            due,
            handle,
        });
        log::debug!(
            "Intersection {} switching to {} for {}s{}",
            id,
            ctrl.signal.phase,
            hold.as_secs_f64(),
            if ctrl.signal.forced { " (override)" } else { "" }
        );
    }

    pub fn phase_of(&self, id: &IntersectionId) -> Option<LightState> {
        self.controllers.get(id).map(|c| c.signal.phase)
    }

    pub fn signal(&self, id: &IntersectionId) -> Option<&IntersectionSignal> {
        self.controllers.get(id).map(|c| &c.signal)
    }

    /// All registered signals, ordered by id. Numeric ids compare by value
    /// and sort ahead of textual ones.
    pub fn signals(&self) -> Vec<&IntersectionSignal> {
        let mut signals: Vec<_> = self.controllers.values().map(|c| &c.signal).collect();
        signals.sort_by(|a, b| compare_ids(&a.id, &b.id));
        signals
    }

    pub fn override_for(&self, id: &IntersectionId) -> Option<&SignalOverride> {
        self.overrides.get(id)
    }

    pub fn overrides(&self) -> &HashMap<IntersectionId, SignalOverride> {
        &self.overrides
    }

    pub fn is_overridden(&self, id: &IntersectionId) -> bool {
        self.overrides.get(id).is_some_and(|o| o.active)
    }

    /// Time until the intersection's next transition.
    pub fn next_transition_in(&self, id: &IntersectionId) -> Option<Duration> {
        let pending = self.controllers.get(id)?.pending.as_ref()?;
        Some(pending.due.saturating_duration_since(self.scheduler.now()))
    }

    /// Number of scheduled transitions across all intersections.
    pub fn pending_transitions(&self) -> usize {
        self.controllers
            .values()
            .filter(|c| c.pending.is_some())
            .count()
    }

    /// Count of signals showing green, yellow and red.
    pub fn phase_counts(&self) -> (usize, usize, usize) {
        self.controllers
            .values()
            .fold((0, 0, 0), |(g, y, r), c| match c.signal.phase {
                LightState::Green => (g + 1, y, r),
                LightState::Yellow => (g, y + 1, r),
                LightState::Red => (g, y, r + 1),
            })
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

fn compare_ids(a: &IntersectionId, b: &IntersectionId) -> Ordering {
    match (a.as_str().parse::<u64>(), b.as_str().parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.as_str().cmp(b.as_str()),
    }
}
