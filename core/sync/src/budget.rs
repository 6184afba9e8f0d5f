//! Wall-clock budget of one invocation.
//!
//! The host kills an invocation after a fixed time. Every loop that starts
//! a network round trip asks the budget first, passing the cost of the
//! previous step as the estimate for the next one.

use std::time::Duration;
use tokio::time::Instant;

/// Soft deadline for one invocation.
#[derive(Debug, Clone)]
pub struct SyncBudget {
    started: Instant,
    deadline: Instant,
    buffer: Duration,
}

impl SyncBudget {
    /// Start the clock now.
    pub fn new(max_runtime: Duration, buffer: Duration) -> Self {
        Self::starting_at(Instant::now(), max_runtime, buffer)
    }

    /// Budget whose clock started at `started`, which may lie in the past.
    pub fn starting_at(started: Instant, max_runtime: Duration, buffer: Duration) -> Self {
        Self {
            started,
            deadline: started + max_runtime,
            buffer,
        }
    }

    /// Whether a step expected to take `estimate` would run past the deadline
    /// minus the safety buffer.
    pub fn should_stop(&self, estimate: Duration) -> bool {
        Instant::now() + estimate + self.buffer > self.deadline
    }

    /// Time left before the buffered deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline
            .checked_sub(self.buffer)
            .map(|end| end.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Predicts the cost of the next step from the last one.
#[derive(Debug, Clone)]
pub struct StepEstimator {
    last: Duration,
    step_started: Option<Instant>,
}

impl StepEstimator {
    /// Estimator whose first prediction is `initial`.
    pub fn new(initial: Duration) -> Self {
        Self {
            last: initial,
            step_started: None,
        }
    }

    pub fn estimate(&self) -> Duration {
        self.last
    }

    /// Mark the start of a step.
    pub fn start(&mut self) {
        self.step_started = Some(Instant::now());
    }

    /// Mark the end of the current step; its duration becomes the next estimate.
    pub fn finish(&mut self) -> Duration {
        if let Some(started) = self.step_started.take() {
            self.last = started.elapsed();
        }
        self.last
    }
}
