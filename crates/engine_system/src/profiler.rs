//! Rolling execution-time estimates for systems.
//!
//! Each system keeps a small window of its most recent execution times. The
//! window mean is the cost estimate fed into the priority calculation.

use std::time::Duration;

/// The estimate used before a system has run at least once.
pub const INITIAL_ESTIMATE: Duration = Duration::from_nanos(1);

/// A fixed-size window of execution-time samples.
#[derive(Debug, Clone)]
pub struct PerformanceProfile {
    samples: Vec<Duration>,
    next: usize,
    average: Duration,
    primed: bool,
}

impl PerformanceProfile {
    /// Create a profile averaging over `window` samples (at least one).
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            samples: vec![INITIAL_ESTIMATE; window.max(1)],
            next: 0,
            average: INITIAL_ESTIMATE,
            primed: false,
        }
    }

    /// Record one measured execution time and return the new estimate.
    ///
    /// The first sample fills the whole window so a single slow or fast run
    /// is not diluted by the placeholder estimate.
    pub fn record(&mut self, sample: Duration) -> Duration {
        if self.primed {
            self.samples[self.next] = sample;
            self.next = (self.next + 1) % self.samples.len();
        } else {
            self.samples.fill(sample);
            self.primed = true;
        }

        let total: Duration = self.samples.iter().sum();
        let count = u32::try_from(self.samples.len()).unwrap_or(u32::MAX);
        self.average = (total / count).max(INITIAL_ESTIMATE);
        self.average
    }

    /// The current estimate.
    #[must_use]
    pub fn estimate(&self) -> Duration {
        self.average
    }

    /// The estimate in nanoseconds, saturating at `u64::MAX`.
    #[must_use]
    pub fn estimate_nanos(&self) -> u64 {
        u64::try_from(self.average.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Number of samples in the averaging window.
    #[must_use]
    pub fn window(&self) -> usize {
        self.samples.len()
    }
}
