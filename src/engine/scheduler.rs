// scheduler.rs
//
// Timer plumbing shared by the signal engine and the dashboard loop. A timer
// never runs code itself: when it fires it posts an event back into the
// single consumer queue, so every state change happens on one execution
// context.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;

// Cancelled manual timers are swept once the queue grows past this.
const PRUNE_THRESHOLD: usize = 64;

/// A scheduled timer that can be cancelled before it fires.
pub trait TimerHandle {
    fn cancel(&self);
}

/// Schedules `event` to be delivered after `delay`.
pub trait Scheduler<E> {
    type Handle: TimerHandle;

    /// Current instant on the scheduler's clock.
    fn now(&self) -> Instant;

    fn schedule(&mut self, delay: Duration, event: E) -> Self::Handle;
}

// ---------------------------------------------------------------------------
// Tokio runtime scheduler
// ---------------------------------------------------------------------------

/// Spawns one sleeping task per timer; the task forwards its event into the
/// dashboard queue when the delay elapses.
pub struct TokioScheduler<T> {
    events: UnboundedSender<T>,
}

impl<T> TokioScheduler<T> {
    pub fn new(events: UnboundedSender<T>) -> Self {
        Self { events }
    }
}

impl<T> Clone for TokioScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}

pub struct TokioTimer(AbortHandle);

impl TimerHandle for TokioTimer {
    fn cancel(&self) {
        self.0.abort();
    }
}

impl<T, E> Scheduler<E> for TokioScheduler<T>
where
    T: Send + 'static,
    E: Into<T>,
{
    type Handle = TokioTimer;

    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn schedule(&mut self, delay: Duration, event: E) -> TokioTimer {
        let events = self.events.clone();
        let event: T = event.into();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The queue is gone once the dashboard shuts down.
            let _ = events.send(event);
        });
        TokioTimer(task.abort_handle())
    }
}

// ---------------------------------------------------------------------------
// Manual (virtual time) scheduler
// ---------------------------------------------------------------------------

struct PendingTimer<T> {
    due: Duration,
    seq: u64,
    event: T,
    cancelled: Rc<Cell<bool>>,
}

struct ManualQueue<T> {
    origin: Instant,
    elapsed: Duration,
    next_seq: u64,
    pending: Vec<PendingTimer<T>>,
}

/// Deterministic virtual-time scheduler. Nothing fires on its own: the owner
/// pops due events with [`ManualScheduler::pop_next`] and feeds them back to
/// whatever scheduled them. Clones share one queue.
pub struct ManualScheduler<T> {
    queue: Rc<RefCell<ManualQueue<T>>>,
}

impl<T> Clone for ManualScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Rc::clone(&self.queue),
        }
    }
}

impl<T> Default for ManualScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ManualScheduler<T> {
    pub fn new() -> Self {
        Self {
            queue: Rc::new(RefCell::new(ManualQueue {
                origin: Instant::now(),
                elapsed: Duration::ZERO,
                next_seq: 0,
                pending: Vec::new(),
            })),
        }
    }

    /// Virtual time elapsed since the scheduler was created.
    pub fn elapsed(&self) -> Duration {
        self.queue.borrow().elapsed
    }

    /// Number of live (not cancelled) timers.
    pub fn pending(&self) -> usize {
        self.queue
            .borrow()
            .pending
            .iter()
            .filter(|p| !p.cancelled.get())
            .count()
    }

    /// When the earliest live timer is due, relative to the scheduler origin.
    pub fn next_due(&self) -> Option<Duration> {
        let mut queue = self.queue.borrow_mut();
        queue.pending.retain(|p| !p.cancelled.get());
        queue.pending.iter().map(|p| p.due).min()
    }

    /// Moves the clock forward without firing anything.
    pub fn advance_to(&self, at: Duration) {
        let mut queue = self.queue.borrow_mut();
        if at > queue.elapsed {
            queue.elapsed = at;
        }
    }

    /// Advances the clock to the earliest live timer and returns its event.
    /// Timers due at the same instant come out in scheduling order.
    pub fn pop_next(&self) -> Option<(Duration, T)> {
        let mut queue = self.queue.borrow_mut();
        queue.pending.retain(|p| !p.cancelled.get());
        let idx = queue
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| (p.due, p.seq))
            .map(|(i, _)| i)?;
        let timer = queue.pending.swap_remove(idx);
        if timer.due > queue.elapsed {
            queue.elapsed = timer.due;
        }
        Some((timer.due, timer.event))
    }

    /// Pops the next event only if it is due at or before `at`; otherwise
    /// just advances the clock to `at`.
    pub fn pop_until(&self, at: Duration) -> Option<(Duration, T)> {
        match self.next_due() {
            Some(due) if due <= at => self.pop_next(),
            _ => {
                self.advance_to(at);
                None
            }
        }
    }
}

pub struct ManualTimer {
    cancelled: Rc<Cell<bool>>,
}

impl ManualTimer {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

impl TimerHandle for ManualTimer {
    fn cancel(&self) {
        self.cancelled.set(true);
    }
}

impl<T, E> Scheduler<E> for ManualScheduler<T>
where
    E: Into<T>,
{
    type Handle = ManualTimer;

    fn now(&self) -> Instant {
        let queue = self.queue.borrow();
        queue.origin + queue.elapsed
    }

    fn schedule(&mut self, delay: Duration, event: E) -> ManualTimer {
        let mut queue = self.queue.borrow_mut();
        let cancelled = Rc::new(Cell::new(false));
        let seq = queue.next_seq;
        queue.next_seq += 1;
        let due = queue.elapsed.saturating_add(delay);
        if queue.pending.len() >= PRUNE_THRESHOLD {
            queue.pending.retain(|p| !p.cancelled.get());
        }
        queue.pending.push(PendingTimer {
            due,
            seq,
            event: event.into(),
            cancelled: Rc::clone(&cancelled),
        });
        ManualTimer { cancelled }
    }
}
