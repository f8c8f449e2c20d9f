//! Scheduler error types.

/// Errors surfaced by the [`Scheduler`](crate::Scheduler).
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// The ordering tags of the registered systems form one or more cycles.
    ///
    /// Each inner list names the systems participating in one cycle. No
    /// system runs in a tick that fails with this error.
    #[error("circular system dependencies detected: {}", format_cycles(.cycles))]
    CyclicDependency {
        /// System names per detected cycle.
        cycles: Vec<Vec<String>>,
    },

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|cycle| format!("[{}]", cycle.join(" -> ")))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_systems() {
        let err = ScheduleError::CyclicDependency {
            cycles: vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]],
        };
        assert_eq!(
            err.to_string(),
            "circular system dependencies detected: [a -> b], [c]"
        );
    }
}
