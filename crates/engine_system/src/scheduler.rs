//! Scheduler core: registration, per-tick orchestration and task reservation.
//!
//! A [`Scheduler`] owns a registry of systems and a fixed pool of worker
//! threads. Each call to [`Scheduler::invoke`] runs every registered system
//! exactly once:
//!
//! 1. Rebuild the dependency graph if systems were added or removed.
//! 2. Refresh stale priorities and reset the per-tick counters.
//! 3. Seed the runnable set with every system that has no dependencies.
//! 4. Wake the workers. The invoking thread works too, until every system
//!    has completed.
//!
//! All bookkeeping lives behind a single mutex that is held only while a
//! task is being reserved or released, never while a system body runs.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::access::AccessTracker;
use crate::config::SchedulerConfig;
use crate::context::TickContext;
use crate::error::ScheduleError;
use crate::graph::{self, GraphSnapshot};
use crate::registry::{SystemId, SystemTable};
use crate::runner;
use crate::system::System;

/// A system that has been caught panicking during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemFailure {
    pub id: SystemId,
    pub name: String,
    /// The panic payload, if it was a string.
    pub message: String,
}

/// Summary of one completed tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// The tick number, starting at 1.
    pub tick: u64,
    /// Number of systems that completed, including skipped and failed ones.
    pub executed: usize,
    /// Number of systems whose `should_run` returned `false`.
    pub skipped: usize,
    /// Wall-clock time spent inside `invoke`.
    pub elapsed: Duration,
    /// Systems that panicked this tick.
    pub failures: Vec<SystemFailure>,
}

impl TickReport {
    /// Returns `true` if no system panicked.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// An entry in the runnable set. Ordered by priority, highest first, then
/// by id, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Runnable {
    priority: Reverse<u64>,
    id: SystemId,
}

impl Runnable {
    fn new(priority: u64, id: SystemId) -> Self {
        Self {
            priority: Reverse(priority),
            id,
        }
    }
}

/// A reserved system, handed to a worker for execution.
pub(crate) struct Task {
    pub id: SystemId,
    pub name: String,
    pub system: Box<dyn System>,
    pub ctx: TickContext,
}

/// What a worker got when it asked for work.
pub(crate) enum Reservation {
    Task(Task),
    /// Systems remain this tick but none is eligible for this thread yet.
    NotReady,
    /// Every system of the current tick has completed.
    Done,
}

/// How a task ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Ran(Duration),
    Skipped,
    Panicked { elapsed: Duration, message: String },
}

/// Bookkeeping for the tick in progress.
#[derive(Debug, Default)]
pub(crate) struct TickState {
    pub tick: u64,
    pub dt: Duration,
    pub now: Option<Instant>,
    /// The thread that called `invoke`; the only one allowed to run
    /// main-thread systems.
    pub invoker: Option<ThreadId>,
    pub runnable: BTreeSet<Runnable>,
    pub access: AccessTracker,
    /// Systems that have not completed yet this tick.
    pub remaining: usize,
    /// Systems currently executing.
    pub running: usize,
    pub executed: usize,
    pub skipped: usize,
    pub failures: Vec<SystemFailure>,
    /// Set while a tick is in progress.
    pub tasks_ready: bool,
    /// Bumped once per tick so workers never run the same tick twice.
    pub generation: u64,
    /// Workers that have not checked in since the current tick started.
    pub busy_threads: usize,
    /// Set on drop; workers exit when they see it.
    pub join: bool,
}

/// Everything guarded by the scheduler mutex.
#[derive(Debug)]
pub(crate) struct State {
    pub table: SystemTable,
    pub tick: TickState,
}

impl State {
    /// Pick the highest-priority eligible system for `thread` and reserve
    /// everything it needs.
    pub fn reserve_next(&mut self, thread: ThreadId) -> Reservation {
        if self.tick.remaining == 0 {
            return Reservation::Done;
        }
        if self.tick.access.is_exclusive() {
            return Reservation::NotReady;
        }

        let on_invoker = self.tick.invoker == Some(thread);
        let candidate = self.tick.runnable.iter().copied().find(|entry| {
            self.table.record(entry.id).is_some_and(|record| {
                record.blacklist_count == 0
                    && (!record.requires_main_thread || on_invoker)
                    && (!record.requires_exclusive || self.tick.running == 0)
                    && self
                        .tick
                        .access
                        .can_grant(&record.component_access, record.entity_access)
            })
        });

        let Some(entry) = candidate else {
            return Reservation::NotReady;
        };
        self.tick.runnable.remove(&entry);

        match self.reserve(entry.id) {
            Some(task) => Reservation::Task(task),
            None => {
                self.abandon(entry.id);
                Reservation::NotReady
            }
        }
    }

    /// Complete a system that could not be reserved as a failure, so its
    /// dependents still run and the tick still finishes.
    fn abandon(&mut self, id: SystemId) {
        let name = self
            .table
            .record(id)
            .map_or_else(|| id.to_string(), |record| record.name.clone());
        error!(system = %name, %id, "runnable system has no body to execute");

        self.enqueue_dependents(id);
        self.tick.remaining -= 1;
        self.tick.executed += 1;
        self.tick.failures.push(SystemFailure {
            id,
            name,
            message: "system body missing".to_string(),
        });
    }

    fn enqueue_dependents(&mut self, id: SystemId) {
        let dependents: Vec<SystemId> = self
            .table
            .record(id)
            .map(|record| record.dependents.iter().copied().collect())
            .unwrap_or_default();

        for dependent in dependents {
            if let Some(record) = self.table.record_mut(dependent) {
                record.remaining_dependencies = record.remaining_dependencies.saturating_sub(1);
                if record.remaining_dependencies == 0 {
                    self.tick
                        .runnable
                        .insert(Runnable::new(record.priority, dependent));
                }
            }
        }
    }

    fn reserve(&mut self, id: SystemId) -> Option<Task> {
        let now = self.tick.now?;
        let record = self.table.record_mut(id)?;
        let system = record.system.take()?;

        self.tick.access.acquire(
            &record.component_access,
            record.entity_access,
            record.requires_exclusive,
        );
        self.tick.running += 1;

        let task = Task {
            id,
            name: record.name.clone(),
            system,
            ctx: TickContext {
                tick: self.tick.tick,
                dt: self.tick.dt,
                now,
                last_run: record.last_run,
            },
        };

        let blacklist: Vec<SystemId> = record.blacklist.iter().copied().collect();
        for other in blacklist {
            if let Some(other) = self.table.record_mut(other) {
                other.blacklist_count += 1;
            }
        }

        Some(task)
    }

    /// Return a finished system to its record, release its reservations and
    /// enqueue dependents that became runnable.
    pub fn complete(&mut self, id: SystemId, system: Box<dyn System>, outcome: Outcome) {
        let now = self.tick.now;
        let Some(record) = self.table.record_mut(id) else {
            return;
        };
        record.system = Some(system);

        let elapsed = match &outcome {
            Outcome::Ran(elapsed) | Outcome::Panicked { elapsed, .. } => Some(*elapsed),
            Outcome::Skipped => None,
        };
        if let Some(elapsed) = elapsed {
            let before = record.profile.estimate();
            if record.profile.record(elapsed) != before {
                record.priority_stale = true;
            }
            record.last_run = now;
        }

        self.tick.access.release(
            &record.component_access,
            record.entity_access,
            record.requires_exclusive,
        );
        self.tick.running -= 1;

        let name = record.name.clone();
        let blacklist: Vec<SystemId> = record.blacklist.iter().copied().collect();

        for other in blacklist {
            if let Some(other) = self.table.record_mut(other) {
                other.blacklist_count = other.blacklist_count.saturating_sub(1);
            }
        }
        self.enqueue_dependents(id);

        self.tick.remaining -= 1;
        self.tick.executed += 1;
        match outcome {
            Outcome::Ran(_) => {}
            Outcome::Skipped => self.tick.skipped += 1,
            Outcome::Panicked { message, .. } => {
                self.tick.failures.push(SystemFailure { id, name, message });
            }
        }
    }

    /// Panics in debug builds if any per-tick state leaked out of the last
    /// tick.
    fn assert_idle(&self) {
        debug_assert!(self.tick.runnable.is_empty(), "runnable set not drained");
        debug_assert_eq!(self.tick.running, 0, "systems still running");
        debug_assert_eq!(self.tick.remaining, 0, "systems still pending");
        debug_assert!(!self.tick.access.has_ongoing_access(), "access still reserved");
        debug_assert!(!self.tick.tasks_ready, "tick already in progress");
        debug_assert!(!self.tick.join, "scheduler is shutting down");
        debug_assert_eq!(self.tick.busy_threads, 0, "workers still busy");
        debug_assert!(
            self.table.records().all(|record| record.blacklist_count == 0),
            "blacklist counters not reset"
        );
    }
}

/// State shared between the scheduler handle and its workers.
#[derive(Debug)]
pub(crate) struct Shared {
    pub state: Mutex<State>,
    /// Signalled when a tick starts and on shutdown.
    pub tasks_ready: Condvar,
    /// Signalled whenever a worker checks in after a tick.
    pub thread_idle: Condvar,
}

/// Shared borrow of a registered system, returned by
/// [`Scheduler::get_system`]. Holds the scheduler lock until dropped.
pub struct SystemRef<'a, T>(MappedMutexGuard<'a, T>);

impl<T> Deref for SystemRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for SystemRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// A multi-threaded, dependency-driven system scheduler.
///
/// # Examples
///
/// ```rust
/// use std::time::{Duration, Instant};
///
/// use engine_component::ComponentTypeId;
/// use engine_system::{FnSystem, Scheduler, SchedulerConfig, SequenceTag, SystemDescriptor, TickContext};
///
/// let position = ComponentTypeId::from_name("Position");
/// let mut scheduler = Scheduler::new(SchedulerConfig::default().with_worker_threads(2)).unwrap();
///
/// scheduler.add_system(FnSystem::new(
///     "physics",
///     SystemDescriptor::new().tag(SequenceTag::named("physics")).write(position),
///     |_: &TickContext| {},
/// ));
/// scheduler.add_system(FnSystem::new(
///     "render",
///     SystemDescriptor::new().run_after(SequenceTag::named("physics")).read(position),
///     |_: &TickContext| {},
/// ));
///
/// let report = scheduler.invoke(Duration::from_millis(16), Instant::now()).unwrap();
/// assert_eq!(report.executed, 2);
/// ```
#[derive(Debug)]
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler and spawn its worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Spawn`] if a worker thread cannot be created.
    /// Workers spawned before the failure are shut down again.
    pub fn new(config: SchedulerConfig) -> Result<Self, ScheduleError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                table: SystemTable::new(config.profiler_samples),
                tick: TickState::default(),
            }),
            tasks_ready: Condvar::new(),
            thread_idle: Condvar::new(),
        });

        let mut scheduler = Self {
            shared,
            workers: Vec::with_capacity(config.worker_threads),
            config,
        };

        for index in 0..scheduler.config.worker_threads {
            let shared = Arc::clone(&scheduler.shared);
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", scheduler.config.thread_name_prefix))
                .spawn(move || runner::worker_main(&shared, index))?;
            scheduler.workers.push(handle);
        }

        info!(workers = scheduler.workers.len(), "scheduler started");
        Ok(scheduler)
    }

    /// The configuration this scheduler was created with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of worker threads, not counting the invoking thread.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Register a system. The graph is rebuilt on the next tick.
    pub fn add_system<S: System>(&mut self, system: S) -> SystemId {
        self.add_boxed_system(Box::new(system))
    }

    /// Register an already boxed system.
    pub fn add_boxed_system(&mut self, system: Box<dyn System>) -> SystemId {
        let id = self.shared.state.lock().table.insert(system);
        debug!(system = %id, "system added");
        id
    }

    /// Unregister a system and call its `on_removed` hook.
    ///
    /// Returns `false` if no system with this id is registered.
    pub fn remove_system(&mut self, id: SystemId) -> bool {
        let removed = self.shared.state.lock().table.remove(id);
        match removed {
            Some(mut system) => {
                system.on_removed();
                debug!(system = %id, "system removed");
                true
            }
            None => false,
        }
    }

    /// Unregister a system of type `T` and hand it back by value.
    ///
    /// Returns `None`, leaving the system registered, if it has another type.
    pub fn take_system<T: System>(&mut self, id: SystemId) -> Option<T> {
        let mut system = self.shared.state.lock().table.take::<T>(id)?;
        system.on_removed();
        debug!(system = %id, "system taken");
        system.into_any().downcast::<T>().ok().map(|system| *system)
    }

    /// Typed read-only access to a registered system.
    ///
    /// The returned guard holds the scheduler lock; drop it before the next
    /// call into the scheduler.
    #[must_use]
    pub fn get_system<T: System>(&self, id: SystemId) -> Option<SystemRef<'_, T>> {
        self.lock_system(id).map(SystemRef)
    }

    /// Typed mutable access to a registered system.
    ///
    /// Like [`Scheduler::get_system`], the guard holds the scheduler lock.
    #[must_use]
    pub fn get_system_mut<T: System>(&mut self, id: SystemId) -> Option<MappedMutexGuard<'_, T>> {
        self.lock_system(id)
    }

    fn lock_system<T: System>(&self, id: SystemId) -> Option<MappedMutexGuard<'_, T>> {
        MutexGuard::try_map(self.shared.state.lock(), |state| state.table.get_mut::<T>(id)).ok()
    }

    /// Returns `true` if a system with this id is registered.
    #[must_use]
    pub fn has_system(&self, id: SystemId) -> bool {
        self.shared.state.lock().table.contains(id)
    }

    /// Number of registered systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().table.len()
    }

    /// Returns `true` if no system is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ticks run so far.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.shared.state.lock().tick.tick
    }

    /// The priority computed at the start of the last tick.
    #[must_use]
    pub fn priority(&self, id: SystemId) -> Option<u64> {
        self.shared.state.lock().table.record(id).map(|r| r.priority)
    }

    /// The rolling execution-time estimate of a system.
    #[must_use]
    pub fn performance(&self, id: SystemId) -> Option<Duration> {
        self.shared
            .state
            .lock()
            .table
            .record(id)
            .map(|r| r.profile.estimate())
    }

    /// Systems that must complete before `id` starts, as of the last graph
    /// rebuild.
    #[must_use]
    pub fn dependencies(&self, id: SystemId) -> Option<Vec<SystemId>> {
        self.shared
            .state
            .lock()
            .table
            .record(id)
            .map(|r| r.dependencies.iter().copied().collect())
    }

    /// Systems that wait for `id`, as of the last graph rebuild.
    #[must_use]
    pub fn dependents(&self, id: SystemId) -> Option<Vec<SystemId>> {
        self.shared
            .state
            .lock()
            .table
            .record(id)
            .map(|r| r.dependents.iter().copied().collect())
    }

    /// Systems that never run concurrently with `id`, as of the last graph
    /// rebuild.
    #[must_use]
    pub fn blacklist(&self, id: SystemId) -> Option<Vec<SystemId>> {
        self.shared
            .state
            .lock()
            .table
            .record(id)
            .map(|r| r.blacklist.iter().copied().collect())
    }

    /// A serialisable view of the current graph, rebuilt first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::CyclicDependency`] if the registered systems
    /// form a cycle.
    pub fn snapshot(&self) -> Result<GraphSnapshot, ScheduleError> {
        let mut state = self.shared.state.lock();
        if state.table.is_changed() {
            graph::rebuild(&mut state.table)?;
        }
        graph::update_priorities(&mut state.table);
        Ok(graph::snapshot(&state.table))
    }

    /// Run every registered system exactly once.
    ///
    /// `dt` is the simulated time step and `now` the timestamp of this tick;
    /// both are passed through to every system in its [`TickContext`].
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::CyclicDependency`] if the ordering tags form
    /// a cycle. No system runs in that case.
    pub fn invoke(&mut self, dt: Duration, now: Instant) -> Result<TickReport, ScheduleError> {
        let started = Instant::now();

        {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            state.assert_idle();

            if state.table.is_changed() {
                graph::rebuild(&mut state.table)?;
            }
            graph::update_priorities(&mut state.table);

            for record in state.table.records_mut() {
                record.remaining_dependencies =
                    u32::try_from(record.dependencies.len()).unwrap_or(u32::MAX);
                record.blacklist_count = 0;
                if record.dependencies.is_empty() {
                    state
                        .tick
                        .runnable
                        .insert(Runnable::new(record.priority, record.id));
                }
            }

            let tick = &mut state.tick;
            tick.tick += 1;
            tick.dt = dt;
            tick.now = Some(now);
            tick.invoker = Some(thread::current().id());
            tick.remaining = state.table.len();
            tick.executed = 0;
            tick.skipped = 0;
            tick.failures.clear();

            debug!(tick = tick.tick, systems = tick.remaining, "tick started");

            if tick.remaining > 0 {
                tick.tasks_ready = true;
                tick.generation += 1;
                tick.busy_threads = self.workers.len();
                self.shared.tasks_ready.notify_all();
            }
        }

        runner::run_until_done(&self.shared);

        let mut state = self.shared.state.lock();
        while state.tick.busy_threads > 0 {
            self.shared.thread_idle.wait(&mut state);
        }

        let tick = &mut state.tick;
        tick.tasks_ready = false;
        tick.invoker = None;

        let report = TickReport {
            tick: tick.tick,
            executed: tick.executed,
            skipped: tick.skipped,
            elapsed: started.elapsed(),
            failures: std::mem::take(&mut tick.failures),
        };

        debug!(
            tick = report.tick,
            executed = report.executed,
            skipped = report.skipped,
            failures = report.failures.len(),
            elapsed_us = report.elapsed.as_micros() as u64,
            "tick finished"
        );
        Ok(report)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.state.lock().tick.join = true;
        self.shared.tasks_ready.notify_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
        info!("scheduler shut down");
    }
}
