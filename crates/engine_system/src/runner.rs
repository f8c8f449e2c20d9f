//! Worker pool: the execution loop shared by worker threads and the thread
//! calling `invoke`.
//!
//! Between ticks a worker blocks on the `tasks_ready` condition variable.
//! Within a tick it repeatedly reserves the best eligible system, runs it
//! without holding the scheduler lock and releases it again. When nothing is
//! eligible yet it yields and retries, since eligibility changes every time
//! another system finishes. Once every system of the tick has completed the
//! worker checks in as idle.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use tracing::{error, info, trace};

use crate::scheduler::{Outcome, Reservation, Shared, Task};

/// Body of a worker thread. Returns when the scheduler is dropped.
pub(crate) fn worker_main(shared: &Shared, index: usize) {
    info!(worker = index, "worker started");
    let mut seen_generation = 0;

    loop {
        {
            let mut state = shared.state.lock();
            while !state.tick.join
                && !(state.tick.tasks_ready && state.tick.generation != seen_generation)
            {
                shared.tasks_ready.wait(&mut state);
            }
            if state.tick.join {
                break;
            }
            seen_generation = state.tick.generation;
        }

        run_until_done(shared);

        let mut state = shared.state.lock();
        state.tick.busy_threads = state.tick.busy_threads.saturating_sub(1);
        shared.thread_idle.notify_all();
    }

    info!(worker = index, "worker stopped");
}

/// Execute tasks until every system of the current tick has completed.
pub(crate) fn run_until_done(shared: &Shared) {
    let thread = thread::current().id();

    loop {
        let reservation = shared.state.lock().reserve_next(thread);
        match reservation {
            Reservation::Task(task) => execute(shared, task),
            Reservation::NotReady => thread::yield_now(),
            Reservation::Done => break,
        }
    }
}

/// Run one reserved system and hand it back to the scheduler.
fn execute(shared: &Shared, task: Task) {
    let Task {
        id,
        name,
        mut system,
        ctx,
    } = task;

    // `should_run` runs under the same unwind guard as `run`.
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        if system.should_run(&ctx) {
            trace!(system = %name, tick = ctx.tick, "running system");
            system.run(&ctx);
            true
        } else {
            false
        }
    }));
    let elapsed = started.elapsed();

    let outcome = match result {
        Ok(true) => Outcome::Ran(elapsed),
        Ok(false) => {
            trace!(system = %name, tick = ctx.tick, "system skipped");
            Outcome::Skipped
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(system = %name, %id, tick = ctx.tick, %message, "system panicked");
            Outcome::Panicked { elapsed, message }
        }
    };

    shared.state.lock().complete(id, system, outcome);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
