//! Speculative (hedged) execution policy capability contract.

use std::fmt;
use std::time::Duration;

/// Decides how many extra racing attempts to spawn for idempotent queries,
/// and how far apart to space them. Grounded on
/// `SpeculativeExecutionPolicy`/`SimpleSpeculativeExecutionPolicy` in the
/// pack's modern sibling driver (`CodeLieutenant-scylla-rust-driver`), renamed
/// to match this spec's vocabulary (`Attempts`/`Delay` rather than
/// `max_retry_count`/`retry_interval`).
pub trait SpeculativeExecutionPolicy: fmt::Debug + Send + Sync {
    /// The maximum number of *additional* speculative attempts beyond the
    /// primary execution.
    fn attempts(&self) -> usize;

    /// The delay between each speculative attempt's spawn.
    fn delay(&self) -> Duration;
}

/// A policy that schedules a fixed number of speculative executions,
/// separated by a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct SimpleSpeculativeExecutionPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl SpeculativeExecutionPolicy for SimpleSpeculativeExecutionPolicy {
    fn attempts(&self) -> usize {
        self.attempts
    }

    fn delay(&self) -> Duration {
        self.delay
    }
}

/// A policy that never spawns additional attempts. Equivalent to leaving a
/// query's speculative policy unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSpeculation;

impl SpeculativeExecutionPolicy for NoSpeculation {
    fn attempts(&self) -> usize {
        0
    }

    fn delay(&self) -> Duration {
        Duration::ZERO
    }
}
