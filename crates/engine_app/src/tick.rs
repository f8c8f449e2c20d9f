//! Fixed-timestep tick loop.
//!
//! Each tick hands the fixed time step and the tick's start timestamp to the
//! scheduler, which runs every registered system once. The loop then sleeps
//! out the rest of the tick budget, or warns if the tick overran it.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{error, info, warn};

use engine_system::{Scheduler, TickReport};

/// Configuration for the tick loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
        }
    }
}

impl TickConfig {
    /// Duration of one tick.
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(f64::EPSILON))
    }
}

/// Drives a [`Scheduler`] at a fixed rate.
#[derive(Debug)]
pub struct TickLoop {
    config: TickConfig,
    scheduler: Scheduler,
    /// Ticks that exceeded their budget.
    overruns: u64,
    /// Total system panics seen so far.
    failures: u64,
}

impl TickLoop {
    #[must_use]
    pub fn new(config: TickConfig, scheduler: Scheduler) -> Self {
        Self {
            config,
            scheduler,
            overruns: 0,
            failures: 0,
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Number of ticks run so far.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.scheduler.tick()
    }

    #[must_use]
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the registered systems cannot be scheduled.
    pub fn tick(&mut self, dt: Duration) -> Result<TickReport> {
        let report = self.scheduler.invoke(dt, Instant::now())?;

        for failure in &report.failures {
            error!(
                tick = report.tick,
                system = %failure.name,
                id = %failure.id,
                message = %failure.message,
                "system failed"
            );
        }
        self.failures += report.failures.len() as u64;
        Ok(report)
    }

    /// Run the loop for the configured number of ticks, or indefinitely.
    ///
    /// # Errors
    ///
    /// Stops at the first tick that cannot be scheduled.
    pub fn run(&mut self) -> Result<()> {
        let tick_duration = self.config.tick_duration();
        let mut tick_count = 0u64;

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            workers = self.scheduler.worker_count(),
            systems = self.scheduler.len(),
            "starting tick loop"
        );

        loop {
            let start = Instant::now();
            let report = self.tick(tick_duration)?;

            tick_count += 1;
            if self.config.max_ticks > 0 && tick_count >= self.config.max_ticks {
                info!(
                    ticks = tick_count,
                    overruns = self.overruns,
                    failures = self.failures,
                    "tick loop complete"
                );
                break;
            }

            let elapsed = start.elapsed();
            if elapsed < tick_duration {
                std::thread::sleep(tick_duration - elapsed);
            } else {
                self.overruns += 1;
                warn!(
                    tick_id = report.tick,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use engine_system::{FnSystem, SchedulerConfig, SequenceTag, SystemDescriptor, TickContext};

    use super::*;

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default().with_worker_threads(1)).unwrap()
    }

    #[test]
    fn test_tick_advances_counter() {
        let mut tick_loop = TickLoop::new(TickConfig::default(), scheduler());
        assert_eq!(tick_loop.tick_id(), 0);
        tick_loop.tick(Duration::from_millis(16)).unwrap();
        assert_eq!(tick_loop.tick_id(), 1);
        tick_loop.tick(Duration::from_millis(16)).unwrap();
        assert_eq!(tick_loop.tick_id(), 2);
    }

    #[test]
    fn test_run_limited_ticks() {
        let runs = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&runs);
        let mut scheduler = scheduler();
        scheduler.add_system(FnSystem::new(
            "count",
            SystemDescriptor::new(),
            move |ctx: &TickContext| {
                assert_eq!(ctx.dt, Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        let config = TickConfig {
            tick_rate: 1000.0,
            max_ticks: 5,
        };
        let mut tick_loop = TickLoop::new(config, scheduler);
        tick_loop.run().unwrap();

        assert_eq!(tick_loop.tick_id(), 5);
        assert_eq!(runs.load(Ordering::SeqCst), 5);
        assert_eq!(tick_loop.failures(), 0);
    }

    #[test]
    fn test_failures_are_counted() {
        let mut scheduler = scheduler();
        scheduler.add_system(FnSystem::new(
            "faulty",
            SystemDescriptor::new(),
            |_: &TickContext| panic!("faulty system"),
        ));

        let mut tick_loop = TickLoop::new(TickConfig::default(), scheduler);
        let report = tick_loop.tick(Duration::from_millis(16)).unwrap();
        assert_eq!(report.failures.len(), 1);
        tick_loop.tick(Duration::from_millis(16)).unwrap();
        assert_eq!(tick_loop.failures(), 2);
    }

    #[test]
    fn test_cycle_stops_the_loop() {
        let tag = SequenceTag::named("loop");
        let mut scheduler = scheduler();
        scheduler.add_system(FnSystem::new(
            "self-ordered",
            SystemDescriptor::new().tag(tag).run_before(tag),
            |_: &TickContext| {},
        ));

        let mut tick_loop = TickLoop::new(TickConfig::default(), scheduler);
        let err = tick_loop.run().unwrap_err();
        assert!(err.to_string().contains("self-ordered"));
        assert_eq!(tick_loop.tick_id(), 0);
    }

    #[test]
    fn test_tick_duration() {
        let config = TickConfig {
            tick_rate: 50.0,
            max_ticks: 0,
        };
        assert_eq!(config.tick_duration(), Duration::from_millis(20));
    }
}
