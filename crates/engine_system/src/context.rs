//! Per-tick execution context provided to systems.

use std::time::{Duration, Instant};

/// Context provided to a system on each tick.
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    /// The current tick number, starting at 1 for the first `invoke`.
    pub tick: u64,
    /// The amount of time simulated during this tick.
    pub dt: Duration,
    /// The timestamp of this tick.
    pub now: Instant,
    /// The timestamp of the last tick in which this system actually ran.
    pub last_run: Option<Instant>,
}

impl TickContext {
    /// Create a context for a system that has not run yet.
    #[must_use]
    pub fn new(tick: u64, dt: Duration, now: Instant) -> Self {
        Self {
            tick,
            dt,
            now,
            last_run: None,
        }
    }

    /// Delta time in seconds.
    #[must_use]
    pub fn dt_secs(&self) -> f32 {
        self.dt.as_secs_f32()
    }

    /// Time elapsed since this system last ran, if it ran before.
    #[must_use]
    pub fn since_last_run(&self) -> Option<Duration> {
        self.last_run
            .map(|last| self.now.saturating_duration_since(last))
    }
}
