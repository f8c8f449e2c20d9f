//! Scheduler configuration.

use serde::Deserialize;

/// Environment variable overriding [`SchedulerConfig::worker_threads`].
pub const WORKER_THREADS_ENV: &str = "ENGINE_WORKER_THREADS";

/// Environment variable overriding [`SchedulerConfig::profiler_samples`].
pub const PROFILER_SAMPLES_ENV: &str = "ENGINE_PROFILER_SAMPLES";

/// Default number of samples averaged into a system's performance estimate.
pub const DEFAULT_PROFILER_SAMPLES: usize = 16;

/// Configuration for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads spawned in addition to the thread calling
    /// `invoke`. Zero runs every system on the invoking thread.
    pub worker_threads: usize,
    /// Number of execution-time samples averaged into each system's
    /// performance estimate. Values below one are treated as one.
    pub profiler_samples: usize,
    /// Worker threads are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            worker_threads: parallelism.saturating_sub(1),
            profiler_samples: DEFAULT_PROFILER_SAMPLES,
            thread_name_prefix: "ecs-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Build a config from the process environment, falling back to
    /// [`SchedulerConfig::default`] for unset or unparsable values.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(workers) = lookup(WORKER_THREADS_ENV).and_then(|v| v.trim().parse().ok()) {
            config.worker_threads = workers;
        }
        if let Some(samples) = lookup(PROFILER_SAMPLES_ENV).and_then(|v| v.trim().parse().ok()) {
            config.profiler_samples = samples;
        }

        config
    }

    /// Override the number of worker threads.
    #[must_use]
    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Override the performance averaging window.
    #[must_use]
    pub fn with_profiler_samples(mut self, count: usize) -> Self {
        self.profiler_samples = count;
        self
    }

    /// Override the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}
