//! Named one-shot and repeating timers on a monotonic clock.
//!
//! The session state machine never blocks: it tells the host event loop how
//! long `poll(2)` may sleep ([`TimerWheel::next_deadline_ms`]) and collects
//! expired timers afterwards ([`TimerWheel::fire_due`]). Timers carry a
//! plain token instead of a callback, so the owner dispatches expirations
//! with an exhaustive `match` and no type erasure.
//!
//! All deadlines are [`Instant`] based. Wall-clock jumps never fire a timer
//! early.

use std::time::{Duration, Instant};

/// Poll timeout returned when no timer is armed, in milliseconds.
const IDLE_TIMEOUT_MS: i32 = 1000;

/// Handle to a timer registered with [`TimerWheel::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(usize);

#[derive(Debug)]
struct Timer<E> {
    event: E,
    name: &'static str,
    active: bool,
    deadline: Instant,
    period: Duration,
    oneshot: bool,
}

/// A small collection of named timers with a "time until next fire" query.
///
/// `E` is the token type handed back by [`fire_due`](Self::fire_due);
/// the session uses a tagged enum with one variant per timer.
#[derive(Debug)]
pub struct TimerWheel<E> {
    timers: Vec<Timer<E>>,
}

impl<E: Copy> TimerWheel<E> {
    pub fn new() -> Self {
        Self { timers: Vec::new() }
    }

    /// Register a timer. It starts out inactive.
    pub fn create(&mut self, event: E, name: &'static str) -> TimerId {
        self.timers.push(Timer {
            event,
            name,
            active: false,
            deadline: Instant::now(),
            period: Duration::ZERO,
            oneshot: true,
        });
        TimerId(self.timers.len() - 1)
    }

    /// Arm a timer to fire `delay` from now.
    ///
    /// Restarting an already active timer replaces its deadline.
    pub fn start(&mut self, id: TimerId, delay: Duration, oneshot: bool) {
        let timer = &mut self.timers[id.0];
        timer.deadline = Instant::now() + delay;
        timer.period = delay;
        timer.oneshot = oneshot;
        timer.active = true;
        tracing::trace!(name = timer.name, delay_ms = delay.as_millis() as u64, oneshot, "timer armed");
    }

    /// Disarm a timer. Stopping an inactive timer is a no-op.
    pub fn stop(&mut self, id: TimerId) {
        let timer = &mut self.timers[id.0];
        if timer.active {
            timer.active = false;
            tracing::trace!(name = timer.name, "timer stopped");
        }
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.timers[id.0].active
    }

    /// Milliseconds until the earliest active deadline, suitable as the
    /// upper bound for a `poll(2)` timeout.
    ///
    /// Returns [`IDLE_TIMEOUT_MS`] when nothing is armed, so a host loop
    /// still wakes up about once a second to re-examine external state.
    pub fn next_deadline_ms(&self) -> i32 {
        self.deadline_ms_at(Instant::now())
    }

    /// Collect the events of all expired timers, earliest deadline first.
    ///
    /// One-shot timers are deactivated before their event is returned, so
    /// the dispatcher may immediately re-arm them. Repeating timers advance
    /// by their period.
    pub fn fire_due(&mut self) -> Vec<E> {
        self.fire_due_at(Instant::now())
    }

    fn deadline_ms_at(&self, now: Instant) -> i32 {
        self.timers
            .iter()
            .filter(|t| t.active)
            .map(|t| t.deadline.saturating_duration_since(now).as_millis().min(i32::MAX as u128) as i32)
            .min()
            .unwrap_or(IDLE_TIMEOUT_MS)
    }

    fn fire_due_at(&mut self, now: Instant) -> Vec<E> {
        let mut due: Vec<(Instant, usize)> = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.active && t.deadline <= now)
            .map(|(i, t)| (t.deadline, i))
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);

        let mut events = Vec::with_capacity(due.len());
        for (_, index) in due {
            let timer = &mut self.timers[index];
            if timer.oneshot {
                timer.active = false;
            } else {
                timer.deadline += timer.period;
            }
            tracing::trace!(name = timer.name, "timer fired");
            events.push(timer.event);
        }
        events
    }
}

impl<E: Copy> Default for TimerWheel<E> {
    fn default() -> Self {
        Self::new()
    }
}
